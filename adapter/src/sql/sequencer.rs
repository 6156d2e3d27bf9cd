/// Separator placed between statements of one submission.
const STATEMENT_SEPARATOR: &str = "; ";

/// Ordered statements submitted together as one BigQuery job.
///
/// BigQuery runs the statements of a script in order and returns the result of the last one,
/// so a batch always ends with the statement whose rows the caller wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlBatch {
    statements: Vec<String>,
    region: Option<String>,
}

impl SqlBatch {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statements: vec![statement.into()],
            region: None,
        }
    }

    /// Appends a statement that runs after every statement already in the batch.
    pub fn then(mut self, statement: impl Into<String>) -> Self {
        self.statements.push(statement.into());
        self
    }

    /// Sets the location the job is submitted under.
    pub fn in_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Joins the statements into one submission body, preserving order.
    pub fn body(&self) -> String {
        self.statements.join(STATEMENT_SEPARATOR)
    }
}

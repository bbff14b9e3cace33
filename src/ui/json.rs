use std::io::Write;

use serde_json::json;

use super::Presenter;
use crate::errors::Result;
use crate::feedback::Feedback;

/// Prints every feedback item as one line of JSON
pub struct JsonUi<W: Write> {
    out: W,
}

impl<W: Write> JsonUi<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Presenter for JsonUi<W> {
    fn present(&mut self, feedback: Feedback) -> Result<()> {
        writeln!(self.out, "{}", json!({ "feedback": feedback }))?;
        Ok(())
    }
}

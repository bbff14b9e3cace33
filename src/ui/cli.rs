use std::io::Write;

use super::Presenter;
use crate::errors::Result;
use crate::feedback::Feedback;

/// Prints feedback as plain text, one item after the other
pub struct TextUi<W: Write> {
    out: W,
}

impl<W: Write> TextUi<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Presenter for TextUi<W> {
    fn present(&mut self, feedback: Feedback) -> Result<()> {
        writeln!(self.out, "{feedback}")?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_text_lines() {
        let mut ui = TextUi::new(Vec::new());
        ui.present(Feedback::Thread(7)).unwrap();
        ui.present(Feedback::Text(String::new())).unwrap();
        ui.present(Feedback::value("main", "arg 1", 3)).unwrap();
        let text = String::from_utf8(ui.into_inner()).unwrap();
        assert_eq!(text, "**** LWP 7 ****\n\nmain: arg 1=3\n");
    }
}

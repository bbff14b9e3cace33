//! Renderers for the [`Feedback`] of an analysis

use crate::errors::Result;
use crate::feedback::Feedback;

pub mod cli;
pub mod json;

/// Receives everything an analysis reports
pub trait Presenter {
    fn present(&mut self, feedback: Feedback) -> Result<()>;
}

/// Collects the feedback, mostly useful for tests and library users
impl Presenter for Vec<Feedback> {
    fn present(&mut self, feedback: Feedback) -> Result<()> {
        self.push(feedback);
        Ok(())
    }
}

impl<P: Presenter + ?Sized> Presenter for &mut P {
    fn present(&mut self, feedback: Feedback) -> Result<()> {
        (**self).present(feedback)
    }
}

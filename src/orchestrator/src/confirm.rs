use std::io::{self, BufRead, Write};
use std::sync::Arc;

use common::SweepError;

use crate::plan::StepKind;

/// Source of operator answers.
#[cfg_attr(test, mockall::automock)]
pub trait Prompt: Send + Sync {
    /// Show `question` and return the operator's answer line.
    fn ask(&self, question: &str) -> io::Result<String>;
}

/// Asks on standard error, reads one line from standard input.
pub struct StdinPrompt;

impl Prompt for StdinPrompt {
    fn ask(&self, question: &str) -> io::Result<String> {
        let mut stderr = io::stderr().lock();
        write!(stderr, "{question}")?;
        stderr.flush()?;

        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(answer)
    }
}

/// Gate in front of every step.
///
/// Interactive mode requires the step's keyword (case-insensitive); auto mode
/// lets everything through without reading input.
#[derive(Clone)]
pub struct Confirmer {
    prompt: Option<Arc<dyn Prompt>>,
}

impl Confirmer {
    pub fn auto() -> Self {
        Self { prompt: None }
    }

    pub fn interactive(prompt: Arc<dyn Prompt>) -> Self {
        Self {
            prompt: Some(prompt),
        }
    }

    pub fn stdin() -> Self {
        Self::interactive(Arc::new(StdinPrompt))
    }

    pub fn is_auto(&self) -> bool {
        self.prompt.is_none()
    }

    pub async fn confirm(&self, step: StepKind) -> Result<(), SweepError> {
        let Some(prompt) = self.prompt.clone() else {
            tracing::debug!(step = %step, "Auto mode, confirmation skipped");
            return Ok(());
        };

        let keyword = step.keyword();
        let question = format!("Type '{keyword}' to {step}: ");
        let answer = tokio::task::spawn_blocking(move || prompt.ask(&question))
            .await
            .map_err(|e| SweepError::io("<stdin>", io::Error::other(e)))?
            .map_err(|e| SweepError::io("<stdin>", e))?;

        if answer.trim().eq_ignore_ascii_case(keyword) {
            tracing::info!(step = %step, "Confirmed");
            Ok(())
        } else {
            tracing::warn!(step = %step, "Confirmation not given, step aborted");
            Err(SweepError::Aborted(step.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;

    #[tokio::test]
    async fn test_keyword_is_case_insensitive() {
        let mut prompt = MockPrompt::new();
        prompt
            .expect_ask()
            .with(eq("Type 'DELETE' to clear declared tables: "))
            .times(1)
            .returning(|_| Ok("delete\n".to_string()));

        let confirmer = Confirmer::interactive(Arc::new(prompt));
        confirmer.confirm(StepKind::ClearDeclared).await.unwrap();
    }

    #[tokio::test]
    async fn test_wrong_answer_aborts() {
        let mut prompt = MockPrompt::new();
        prompt
            .expect_ask()
            .times(1)
            .returning(|_| Ok("y\n".to_string()));

        let confirmer = Confirmer::interactive(Arc::new(prompt));
        let err = confirmer.confirm(StepKind::Export).await.unwrap_err();
        assert!(matches!(err, SweepError::Aborted(_)));
        assert_eq!(err.exit_code(), common::error::exit::ABORTED);
    }

    #[tokio::test]
    async fn test_closed_input_aborts() {
        let mut prompt = MockPrompt::new();
        prompt.expect_ask().returning(|_| Ok(String::new()));

        let confirmer = Confirmer::interactive(Arc::new(prompt));
        assert!(confirmer.confirm(StepKind::ArchiveLogs).await.is_err());
    }

    #[tokio::test]
    async fn test_auto_mode_never_asks() {
        let confirmer = Confirmer::auto();
        assert!(confirmer.is_auto());
        for step in StepKind::ALL {
            confirmer.confirm(step).await.unwrap();
        }
    }
}

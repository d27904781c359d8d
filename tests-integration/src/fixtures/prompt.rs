use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use orchestrator::Prompt;

/// Prompt that answers with a fixed word and records every question.
pub struct CountingPrompt {
    answer: String,
    asked: AtomicUsize,
    questions: Mutex<Vec<String>>,
}

impl CountingPrompt {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: format!("{answer}\n"),
            asked: AtomicUsize::new(0),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

impl Prompt for CountingPrompt {
    fn ask(&self, question: &str) -> io::Result<String> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.questions.lock().unwrap().push(question.to_string());
        Ok(self.answer.clone())
    }
}

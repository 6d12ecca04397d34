// Interactive tester: patient lines in, follow-up questions out

use anyhow::Result;
use crossterm::style::Stylize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::corpus::Message;
use crate::generators::{DistinctQuestionSampler, QuestionGenerator};

use super::commands::Command;

const PROMPT: &str = "Patient: ";
const INTERRUPTED: &str = "Interrupted. Goodbye!";

/// Outcome of one input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Quit,
    Reset,
    /// Blank line, nothing to do
    Skip,
    Questions(Vec<String>),
}

/// Multi-turn session against a question generator
pub struct Tester<G: QuestionGenerator> {
    generator: G,
    sampler: DistinctQuestionSampler,
    history: Vec<Message>,
}

impl<G: QuestionGenerator> Tester<G> {
    pub fn new(generator: G, sampler: DistinctQuestionSampler) -> Self {
        Self {
            generator,
            sampler,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Apply one line of input. Questions are appended to the history as assistant turns.
    pub fn handle_line(&mut self, line: &str) -> Result<Reply> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Reply::Skip);
        }

        match Command::parse(line) {
            Some(Command::Quit) => return Ok(Reply::Quit),
            Some(Command::Reset) => {
                self.history.clear();
                return Ok(Reply::Reset);
            }
            None => {}
        }

        self.history.push(Message::patient(line));
        let questions = match self.sampler.sample(&mut self.generator, &self.history) {
            Ok(questions) => questions,
            Err(e) => {
                // Leave no unanswered patient turn behind
                self.history.pop();
                return Err(e);
            }
        };
        self.history
            .extend(questions.iter().map(|q| Message::assistant(q.as_str())));

        Ok(Reply::Questions(questions))
    }

    /// Read-eval loop on the terminal until quit, Ctrl-C or EOF.
    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new()?;

        println!(
            "{}",
            format!("Follow-up question tester ({})", self.generator.name()).bold()
        );
        println!(
            "{}",
            "Type the patient's words. /reset clears context, q quits.".dark_grey()
        );

        loop {
            match editor.readline(PROMPT) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                    }

                    match self.handle_line(&line) {
                        Ok(Reply::Quit) => {
                            println!("{}", Command::Quit.reply());
                            break;
                        }
                        Ok(Reply::Reset) => println!("{}", Command::Reset.reply().dark_grey()),
                        Ok(Reply::Skip) => {}
                        Ok(Reply::Questions(questions)) => print_questions(&questions),
                        Err(e) => eprintln!("{} {:#}", "Error:".red(), e),
                    }
                }
                Err(e) => match farewell(&e) {
                    Some(message) => {
                        println!("{}", message);
                        break;
                    }
                    None => return Err(e.into()),
                },
            }
        }

        Ok(())
    }
}

/// Goodbye line for readline errors that end the session.
fn farewell(error: &ReadlineError) -> Option<&'static str> {
    match error {
        ReadlineError::Interrupted => Some(INTERRUPTED),
        ReadlineError::Eof => Some(Command::Quit.reply()),
        _ => None,
    }
}

fn print_questions(questions: &[String]) {
    if questions.is_empty() {
        println!("{}", "(no question generated)".dark_grey());
        return;
    }
    for (i, question) in questions.iter().enumerate() {
        println!("{} {}", format!("Q{}:", i + 1).cyan().bold(), question);
    }
}

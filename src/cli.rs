//! Interactive question / approval loop.

use anyhow::Result;
use sqlformat::{FormatOptions, QueryParams, format};
use std::io::{BufRead, Write};

use crate::pipeline::{Decision, Pipeline, RunReport};
use crate::services::database::is_select_query;

pub const QUESTION_PROMPT: &str = "What you want to query?: ";
pub const APPROVAL_PROMPT: &str = "Do you want to go to execute query? (yes/no): ";
pub const CANCELLED_NOTICE: &str = "Operation cancelled by user.";

enum Flow {
    Continue,
    Exit,
}

pub fn is_approval(reply: &str) -> bool {
    matches!(reply.trim().to_lowercase().as_str(), "yes" | "y")
}

pub struct Repl<'a, R, W> {
    pipeline: &'a Pipeline,
    thread_id: &'a str,
    debug: bool,
    input: R,
    output: W,
}

impl<'a, R: BufRead, W: Write> Repl<'a, R, W> {
    pub fn new(pipeline: &'a Pipeline, thread_id: &'a str, debug: bool, input: R, output: W) -> Self {
        Self {
            pipeline,
            thread_id,
            debug,
            input,
            output,
        }
    }

    /// Run until the user declines a query or input ends
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let Some(question) = self.ask(QUESTION_PROMPT)? else {
                break;
            };
            if question.is_empty() {
                continue;
            }

            match self.turn(&question).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => {
                    tracing::error!("turn failed: {:#}", e);
                    writeln!(self.output, "Error: {:#}", e)?;
                }
            }
        }
        Ok(())
    }

    async fn turn(&mut self, question: &str) -> Result<Flow> {
        let report = self.pipeline.start(self.thread_id, question).await?;
        self.print_updates(&report)?;

        let query = report.state.query().unwrap_or_default();
        writeln!(
            self.output,
            "\nDrafted query:\n{}\n",
            format(query, &QueryParams::None, &FormatOptions::default())
        )?;
        if !is_select_query(query) {
            writeln!(
                self.output,
                "Warning: this statement is not a plain read and may modify data."
            )?;
        }

        let approved = self
            .ask(APPROVAL_PROMPT)?
            .is_some_and(|reply| is_approval(&reply));

        if approved {
            let report = self.pipeline.resume(self.thread_id, Decision::Approve).await?;
            self.print_updates(&report)?;
            if let Some(answer) = report.state.answer() {
                writeln!(self.output, "{}", answer.replace("\\n", "\n"))?;
            }
            Ok(Flow::Continue)
        } else {
            self.pipeline.resume(self.thread_id, Decision::Reject).await?;
            writeln!(self.output, "{}", CANCELLED_NOTICE)?;
            Ok(Flow::Exit)
        }
    }

    fn print_updates(&mut self, report: &RunReport) -> Result<()> {
        if self.debug {
            for update in &report.updates {
                writeln!(self.output, "{}", update)?;
            }
        }
        Ok(())
    }

    /// Prompt and read one trimmed line; `None` at end of input
    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use log::info;

use crate::dialogue::transcript::Transcript;
use crate::dialogue::DialogueIo;

/// Line-based transport: prompts go to `output`, one answer per line of `input`.
/// Typing `quit` or `exit`, or closing the input, abandons the dialogue.
pub struct Terminal<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Terminal<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> DialogueIo for Terminal<R, W> {
    fn display(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "\n{text}").context("failed to write prompt")?;
        Ok(())
    }

    fn next_answer(&mut self) -> Result<Option<String>> {
        write!(self.output, "> ")?;
        self.output.flush()?;

        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("failed to read answer")?;
        if read == 0 {
            return Ok(None);
        }

        let answer = line.trim_end_matches(['\r', '\n']).to_string();
        if answer.eq_ignore_ascii_case("quit") || answer.eq_ignore_ascii_case("exit") {
            info!("User left the dialogue");
            return Ok(None);
        }
        Ok(Some(answer))
    }

    fn end_dialogue(&mut self, transcript: &Transcript) -> Result<()> {
        writeln!(
            self.output,
            "\n========================================\n  Dialogue finished: {} answer(s)\n========================================",
            transcript.answers().len()
        )?;
        Ok(())
    }
}

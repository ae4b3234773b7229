//! CLI utilities for tundra.
//!
//! The prompt loop and result printing used by the `tundra` binary.
use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::block::Block;

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// `.exit`, or end of input
    Exit,
    /// `.ping`
    Ping,
    /// Anything that is not a dot command is sent to the server as is.
    Query(String),
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unrecognized command '{0}'")]
    Unrecognized(String),
}

/// Prompts the user for one command. Blank lines are skipped.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, PromptError>
where
    R: BufRead,
    W: Write,
{
    loop {
        write!(&mut writer, "> ")?;
        writer.flush()?;

        let mut s = String::default();
        if reader.read_line(&mut s)? == 0 {
            return Ok(Command::Exit);
        }
        match s.trim() {
            "" => continue,
            ".exit" | ".quit" => return Ok(Command::Exit),
            ".ping" => return Ok(Command::Ping),
            s if !s.starts_with('.') => {
                return Ok(Command::Query(s.trim_end_matches(';').to_string()));
            }
            s => return Err(PromptError::Unrecognized(s.to_string())),
        }
    }
}

/// Writes the column names as a tab separated header line.
pub fn write_header<W: Write>(mut writer: W, block: &Block) -> io::Result<()> {
    let names: Vec<&str> = block.names().collect();
    writeln!(writer, "{}", names.join("\t"))
}

/// Writes every row of `block`, values separated by tabs.
pub fn write_rows<W: Write>(mut writer: W, block: &Block) -> io::Result<()> {
    for row in block.iter_rows() {
        let line: Vec<String> = row.iter().map(ToString::to_string).collect();
        writeln!(writer, "{}", line.join("\t"))?;
    }
    Ok(())
}

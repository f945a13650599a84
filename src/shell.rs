use std::io::{BufRead, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::Context;
use backon::{BlockingRetryable, ConstantBuilder};

use crate::protocol::{MAX_RESPONSE_LEN, read_frame, write_frame};
use crate::query::{EXIT_CODE, Query, menu_text, unknown_query_text};

/// Reads one trimmed line after printing `label`. `None` on end of input.
pub fn prompt<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    label: &str,
) -> Result<Option<String>, anyhow::Error> {
    write!(output, "{label}")?;
    output.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line).context("Failed to read input")? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

pub fn prompt_port<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
) -> Result<u16, anyhow::Error> {
    let port = prompt(input, output, "Enter port number: ")?.context("No port number given")?;
    port.parse::<u16>().with_context(|| format!("Invalid port number: {port:?}"))
}

pub fn connect(host: &str, port: u16) -> Result<TcpStream, anyhow::Error> {
    let retry_builder = ConstantBuilder::default()
        .with_delay(Duration::from_millis(500))
        .with_max_times(5);

    (|| TcpStream::connect((host, port)))
        .retry(retry_builder)
        .notify(|e, dur| {
            log::error!("{e}");
            log::info!("Retrying in {:?}", dur);
        })
        .call()
        .with_context(|| format!("Failed to connect to {host}:{port}"))
}

/// Terminal menu that forwards choices to the server and prints the replies.
pub struct Shell<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Shell<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    pub fn run<S: Read + Write>(&mut self, stream: &mut S) -> Result<(), anyhow::Error> {
        loop {
            writeln!(self.output, "\n{}", menu_text())?;
            let Some(choice) = prompt(
                &mut self.input,
                &mut self.output,
                "\nEnter your choice (1-4): ",
            )?
            else {
                return self.exit(stream);
            };

            match Query::parse(&choice) {
                Some(Query::Exit) => return self.exit(stream),
                Some(_) => {}
                None => {
                    writeln!(self.output, "{}", unknown_query_text())?;
                    continue;
                }
            }

            write_frame(stream, &choice).context("Failed to send query")?;
            let reply = read_frame(stream, MAX_RESPONSE_LEN)
                .context("Failed to receive reply")?
                .context("Server closed the connection")?;

            writeln!(self.output, "\nServer replied:\n{reply}\n")?;
        }
    }

    fn exit<S: Write>(&mut self, stream: &mut S) -> Result<(), anyhow::Error> {
        writeln!(self.output, "Exiting...")?;
        write_frame(stream, EXIT_CODE).context("Failed to send exit")?;
        Ok(())
    }
}

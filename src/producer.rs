//! The production loop.
//!
//! Records are produced from a delimited input stream in one of two modes:
//!
//! - attended: a person at a terminal. Input is line based, every value is
//!   prompted for, `X` ends the loop and each write is echoed.
//! - unattended: a pipe. Input is split on a single byte delimiter and nothing
//!   is written to the terminal. Keyed input alternates value and key tokens.
//!
//! Either way the writer is closed when the loop ends.
use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::{
    client::{BrokerClient, Headers, MessageWriter, Record},
    error::{Error, Result},
    session::Session,
};

const SENTINEL: &[u8] = b"x";
const DEFAULT_KEY: &[u8] = b"default";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Attended,
    Unattended,
}

#[derive(Clone, Debug)]
pub struct ProduceOptions {
    pub topic: String,
    pub keyed: bool,
    pub mode: Mode,
    /// Token delimiter in unattended mode. Attended input is always line based.
    pub delimiter: u8,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProduceSummary {
    pub written: usize,
    /// The loop ended on a write failure.
    pub failed: bool,
}

/// Terminal output requested by the attended loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prompt<'a> {
    Banner { topic: &'a str },
    FirstKey,
    NextKey,
    Wrote { value: &'a [u8], topic: &'a str },
    WriteFailed,
}

/// Sink for attended mode prompts.
pub trait Prompter {
    fn prompt(&mut self, prompt: Prompt<'_>);
}

/// Splits an input stream into tokens on a single byte.
pub struct TokenScanner<R> {
    input: R,
    delimiter: u8,
    buffer: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> TokenScanner<R> {
    pub fn new(input: R, delimiter: u8) -> Self {
        Self {
            input,
            delimiter,
            buffer: Vec::new(),
        }
    }

    /// The next token without its delimiter, or `None` once the input is
    /// exhausted. A trailing `\r` is dropped when splitting on newlines.
    pub async fn next_token(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        self.buffer.clear();
        let read = self.input.read_until(self.delimiter, &mut self.buffer).await?;
        if read == 0 {
            return Ok(None);
        }

        let mut token = std::mem::take(&mut self.buffer);
        if token.last() == Some(&self.delimiter) {
            token.pop();
        }
        if self.delimiter == b'\n' && token.last() == Some(&b'\r') {
            token.pop();
        }
        Ok(Some(token))
    }
}

/// Drive `writer` from `input` until the input is exhausted, the sentinel is
/// entered, or a write fails. The writer is always closed.
///
/// A failed write is reported and ends the loop; it is reflected in the
/// returned summary rather than as an error. Errors reading `input` are
/// returned after the writer has been closed.
pub async fn produce<W, R, P>(
    mut writer: W,
    input: R,
    options: &ProduceOptions,
    prompter: &mut P,
) -> Result<ProduceSummary>
where
    W: MessageWriter,
    R: AsyncBufRead + Unpin,
    P: Prompter + ?Sized,
{
    let attended = options.mode == Mode::Attended;
    let delimiter = if attended { b'\n' } else { options.delimiter };
    let mut scanner = TokenScanner::new(input, delimiter);
    let mut summary = ProduceSummary::default();
    let mut key: Vec<u8> = Vec::new();

    if attended {
        prompter.prompt(Prompt::Banner {
            topic: &options.topic,
        });
    }

    let outcome: Result<()> = loop {
        let value = match scanner.next_token().await {
            Ok(Some(value)) => value,
            Ok(None) => break Ok(()),
            Err(err) => break Err(Error::Io(err)),
        };

        if attended && value.eq_ignore_ascii_case(SENTINEL) {
            break Ok(());
        }

        if options.keyed {
            if attended {
                if key.is_empty() {
                    key = DEFAULT_KEY.to_vec();
                    prompter.prompt(Prompt::FirstKey);
                } else {
                    prompter.prompt(Prompt::NextKey);
                }
            }

            match scanner.next_token().await {
                Ok(Some(entered)) => {
                    if !entered.is_empty() {
                        key = entered;
                    }
                }
                Ok(None) => {
                    tracing::debug!("Input ended before the key of the last value");
                    break Ok(());
                }
                Err(err) => break Err(Error::Io(err)),
            }
        }

        let record = Record::new(Bytes::from(key.clone()), Bytes::from(value.clone()));
        if let Err(err) = writer.write(record).await {
            if attended {
                prompter.prompt(Prompt::WriteFailed);
            }
            tracing::error!(
                "error writing [{} > {}]: {}",
                String::from_utf8_lossy(&value),
                options.topic,
                err
            );
            summary.failed = true;
            break Ok(());
        }
        summary.written += 1;

        if attended {
            prompter.prompt(Prompt::Wrote {
                value: &value,
                topic: &options.topic,
            });
        }
    };

    if let Err(err) = writer.close().await {
        tracing::warn!("error closing writer: {}", err);
    }

    tracing::info!(
        "wrote {} records to topic '{}'",
        summary.written,
        options.topic
    );
    outcome.map(|_| summary)
}

impl<C: BrokerClient> Session<C> {
    /// Open a writer for `topic` using the session's bootstrap addresses.
    pub async fn open_writer(&self, topic: &str, keyed: bool) -> Result<C::Writer> {
        if topic.is_empty() {
            return Err(Error::invalid("topic name is required"));
        }
        self.client()
            .open_writer(self.bootstrap(), topic, keyed)
            .await
            .map_err(|source| Error::WriteFailed {
                topic: topic.to_owned(),
                source,
            })
    }

    /// Run the production loop for `options.topic` over `input`.
    pub async fn produce<R, P>(
        &self,
        input: R,
        options: &ProduceOptions,
        prompter: &mut P,
    ) -> Result<ProduceSummary>
    where
        R: AsyncBufRead + Unpin,
        P: Prompter + ?Sized,
    {
        let writer = self.open_writer(&options.topic, options.keyed).await?;
        produce(writer, input, options, prompter).await
    }

    /// Write a single keyed record with headers.
    pub async fn write_record(
        &self,
        topic: &str,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        headers: Headers,
    ) -> Result<()> {
        let mut writer = self.open_writer(topic, true).await?;
        let record = Record::new(key, value).with_headers(headers);

        let written = writer.write(record).await;
        if let Err(err) = writer.close().await {
            tracing::warn!("error closing writer: {}", err);
        }

        written.map_err(|source| Error::WriteFailed {
            topic: topic.to_owned(),
            source,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn tokens(input: &'static [u8], delimiter: u8) -> Vec<Vec<u8>> {
        let mut scanner = TokenScanner::new(input, delimiter);
        let mut tokens = vec![];
        while let Some(token) = scanner.next_token().await.unwrap() {
            tokens.push(token);
        }
        tokens
    }

    #[tokio::test]
    async fn scanner_splits_on_custom_delimiter() {
        assert_eq!(
            tokens(b"v1|k1|v2|k2|", b'|').await,
            vec![b"v1".to_vec(), b"k1".to_vec(), b"v2".to_vec(), b"k2".to_vec()]
        );
    }

    #[tokio::test]
    async fn scanner_keeps_unterminated_tail() {
        assert_eq!(
            tokens(b"a|b", b'|').await,
            vec![b"a".to_vec(), b"b".to_vec()]
        );
        assert!(tokens(b"", b'|').await.is_empty());
    }

    #[tokio::test]
    async fn scanner_strips_carriage_returns_on_lines() {
        assert_eq!(
            tokens(b"hello\r\nworld\n", b'\n').await,
            vec![b"hello".to_vec(), b"world".to_vec()]
        );
        assert_eq!(tokens(b"a\r|b", b'|').await, vec![b"a\r".to_vec(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn scanner_yields_empty_tokens_between_delimiters() {
        assert_eq!(
            tokens(b"v1\n\nv2\n", b'\n').await,
            vec![b"v1".to_vec(), vec![], b"v2".to_vec()]
        );
    }
}

//! SMTP command builder.

use crate::error::{Error, Result};

/// SMTP command sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// HELO - Simple greeting
    Helo {
        /// Client hostname
        hostname: &'a str,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client hostname
        hostname: &'a str,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Mechanism name as returned by the strategy
        mechanism: &'a str,
        /// Base64 initial response (SASL-IR)
        initial_response: Option<&'a str>,
    },
    /// A line of an in-progress SASL exchange (base64, or `*` to cancel)
    AuthResponse(&'a str),
    /// MAIL FROM - Start mail transaction
    MailFrom {
        /// Sender address
        from: &'a str,
        /// Request 8BITMIME body handling
        eight_bit: bool,
    },
    /// RCPT TO - Add recipient
    RcptTo {
        /// Recipient address
        to: &'a str,
    },
    /// DATA - Begin message data
    Data,
    /// QUIT - Close connection
    Quit,
}

impl Command<'_> {
    /// Serializes the command to bytes, terminated by CRLF.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLine`] if an argument contains CR or LF.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();

        match self {
            Self::Helo { hostname } => {
                buf.extend_from_slice(b"HELO ");
                buf.extend_from_slice(validate_line(hostname)?.as_bytes());
            }
            Self::Ehlo { hostname } => {
                buf.extend_from_slice(b"EHLO ");
                buf.extend_from_slice(validate_line(hostname)?.as_bytes());
            }
            Self::StartTls => {
                buf.extend_from_slice(b"STARTTLS");
            }
            Self::Auth {
                mechanism,
                initial_response,
            } => {
                buf.extend_from_slice(b"AUTH ");
                buf.extend_from_slice(validate_line(mechanism)?.as_bytes());
                if let Some(resp) = initial_response {
                    buf.push(b' ');
                    // An empty initial response is sent as "=" (RFC 4954)
                    let resp = if resp.is_empty() { "=" } else { resp };
                    buf.extend_from_slice(validate_line(resp)?.as_bytes());
                }
            }
            Self::AuthResponse(line) => {
                buf.extend_from_slice(validate_line(line)?.as_bytes());
            }
            Self::MailFrom { from, eight_bit } => {
                buf.extend_from_slice(b"MAIL FROM:<");
                buf.extend_from_slice(validate_line(from)?.as_bytes());
                buf.push(b'>');
                if *eight_bit {
                    buf.extend_from_slice(b" BODY=8BITMIME");
                }
            }
            Self::RcptTo { to } => {
                buf.extend_from_slice(b"RCPT TO:<");
                buf.extend_from_slice(validate_line(to)?.as_bytes());
                buf.push(b'>');
            }
            Self::Data => {
                buf.extend_from_slice(b"DATA");
            }
            Self::Quit => {
                buf.extend_from_slice(b"QUIT");
            }
        }

        buf.extend_from_slice(b"\r\n");
        Ok(buf)
    }
}

/// Rejects arguments that would inject extra command lines.
fn validate_line(arg: &str) -> Result<&str> {
    if arg.contains(['\r', '\n']) {
        return Err(Error::InvalidLine(arg.to_string()));
    }
    Ok(arg)
}

use super::error::{ParseErrorKind, Result};
use crate::server::controlchan::command::{AuthParam, Command, ModeParam, Opt, ProtParam, StruParam, TypeParam};
use crate::server::password::Password;

use bytes::Bytes;
use std::path::PathBuf;
use std::str;

/// Parse the given bytes into a [`Command`].
#[allow(clippy::cognitive_complexity)]
pub fn parse<T>(line: T) -> Result<Command>
where
    T: AsRef<[u8]> + Into<Bytes>,
{
    let vec = line.into().to_vec();
    let mut iter = vec.splitn(2, |&b| b == b' ' || b == b'\r' || b == b'\n');
    let cmd_token = normalize(iter.next().unwrap())?;
    let cmd_params = iter.next().unwrap_or(&[]);

    let cmd = match &*cmd_token {
        "USER" => {
            let username = parse_to_eol(cmd_params)?;
            if username.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            Command::User {
                username: Bytes::from(username),
            }
        }
        "PASS" => {
            let password = parse_to_eol(cmd_params)?;
            Command::Pass {
                password: Password::new(password),
            }
        }
        "AUTH" => match str::from_utf8(&parse_to_eol(cmd_params)?)
            .map_err(|_| ParseErrorKind::InvalidUtf8)?
            .trim()
            .to_uppercase()
            .as_str()
        {
            "TLS" => Command::Auth { protocol: AuthParam::Tls },
            "SSL" => Command::Auth { protocol: AuthParam::Ssl },
            _ => return Err(ParseErrorKind::InvalidCommand.into()),
        },
        "ADAT" => {
            let data = required_utf8(cmd_params)?;
            Command::Adat { data }
        }
        "CLNT" => {
            let client_name = required_utf8(cmd_params)?;
            Command::Clnt { client_name }
        }
        "SYST" => {
            no_params(cmd_params)?;
            Command::Syst
        }
        "STAT" => {
            let params = parse_to_eol(cmd_params)?;
            let path = if params.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(&params).to_string())
            };
            Command::Stat { path }
        }
        "FEAT" => {
            no_params(cmd_params)?;
            Command::Feat
        }
        "HELP" => Command::Help,
        "NOOP" | "NOP" => {
            // NOOP params are prohibited
            no_params(cmd_params)?;
            Command::Noop
        }
        "QUIT" => Command::Quit,
        "TYPE" => {
            let params = parse_to_eol(cmd_params)?;
            let mut tokens = params.split(|&b| b == b' ').filter(|t| !t.is_empty());
            let param = match tokens.next() {
                Some(b"A") | Some(b"a") => TypeParam::Ascii,
                Some(b"I") | Some(b"i") => TypeParam::Image,
                Some(b"E") | Some(b"e") => TypeParam::Ebcdic,
                Some(b"L") | Some(b"l") => TypeParam::Local,
                _ => return Err(ParseErrorKind::InvalidCommand.into()),
            };
            Command::Type { param }
        }
        "STRU" => {
            let params = parse_to_eol(cmd_params)?;
            if params.len() > 1 {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            match params.first() {
                Some(b'F') | Some(b'f') => Command::Stru { structure: StruParam::File },
                Some(b'R') | Some(b'r') => Command::Stru { structure: StruParam::Record },
                Some(b'P') | Some(b'p') => Command::Stru { structure: StruParam::Page },
                _ => return Err(ParseErrorKind::InvalidCommand.into()),
            }
        }
        "MODE" => {
            let params = parse_to_eol(cmd_params)?;
            if params.len() > 1 {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            match params.first() {
                Some(b'S') | Some(b's') => Command::Mode { mode: ModeParam::Stream },
                Some(b'B') | Some(b'b') => Command::Mode { mode: ModeParam::Block },
                Some(b'C') | Some(b'c') => Command::Mode { mode: ModeParam::Compressed },
                Some(b'Z') | Some(b'z') => Command::Mode { mode: ModeParam::Zip },
                _ => return Err(ParseErrorKind::InvalidCommand.into()),
            }
        }
        "PORT" => {
            let addr = required_utf8_trimmed(cmd_params)?;
            Command::Port { addr }
        }
        "EPRT" => {
            let addr = required_utf8_trimmed(cmd_params)?;
            Command::Eprt { addr }
        }
        "PASV" => {
            no_params(cmd_params)?;
            Command::Pasv
        }
        "EPSV" => {
            let params = parse_to_eol(cmd_params)?;
            let all = match str::from_utf8(&params).map_err(|_| ParseErrorKind::InvalidUtf8)?.trim().to_uppercase().as_str() {
                "" | "1" | "2" => false,
                "ALL" => true,
                _ => return Err(ParseErrorKind::InvalidCommand.into()),
            };
            Command::Epsv { all }
        }
        "RETR" => Command::Retr { path: required_utf8(cmd_params)? },
        "STOR" => Command::Stor { path: required_utf8(cmd_params)? },
        "APPE" => Command::Appe { path: required_utf8(cmd_params)? },
        "ALLO" => {
            let params = parse_to_eol(cmd_params)?;
            let size = if params.is_empty() {
                None
            } else {
                let text = str::from_utf8(&params).map_err(|_| ParseErrorKind::InvalidUtf8)?;
                let first = text.split_whitespace().next().ok_or(ParseErrorKind::InvalidCommand)?;
                Some(first.parse().map_err(|_| ParseErrorKind::InvalidCommand)?)
            };
            Command::Allo { size }
        }
        "LIST" => {
            let line = parse_to_eol(cmd_params)?;
            let mut options = None;
            let mut path = None;
            for token in line.split(|&b| b == b' ').filter(|t| !t.is_empty()) {
                if token.starts_with(b"-") {
                    options.get_or_insert_with(String::new).push_str(&String::from_utf8_lossy(token));
                } else if path.is_none() {
                    path = Some(String::from_utf8_lossy(token).to_string());
                }
            }
            Command::List { options, path }
        }
        "NLST" => {
            let path = parse_to_eol(cmd_params)?;
            let path = if path.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(&path).to_string())
            };
            Command::Nlst { path }
        }
        "MLSD" => {
            let path = parse_to_eol(cmd_params)?;
            let path = if path.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(&path).to_string())
            };
            Command::Mlsd { path }
        }
        "MLST" => {
            let path = parse_to_eol(cmd_params)?;
            let path = if path.is_empty() {
                None
            } else {
                Some(String::from_utf8_lossy(&path).to_string())
            };
            Command::Mlst { path }
        }
        "PWD" | "XPWD" => {
            no_params(cmd_params)?;
            Command::Pwd
        }
        "CWD" | "XCWD" => Command::Cwd {
            path: required_utf8(cmd_params)?.into(),
        },
        "CDUP" => {
            no_params(cmd_params)?;
            Command::Cdup
        }
        "MKD" | "XMKD" => Command::Mkd {
            path: required_utf8(cmd_params)?.into(),
        },
        "RMD" | "XRMD" => Command::Rmd { path: required_utf8(cmd_params)? },
        "DELE" => Command::Dele { path: required_utf8(cmd_params)? },
        "RNFR" => Command::Rnfr {
            file: required_utf8(cmd_params)?.into(),
        },
        "RNTO" => Command::Rnto {
            file: required_utf8(cmd_params)?.into(),
        },
        "SIZE" => Command::Size {
            file: required_utf8(cmd_params)?.into(),
        },
        "MDTM" => Command::Mdtm {
            file: required_utf8(cmd_params)?.into(),
        },
        "MFMT" => {
            let arg = required_utf8(cmd_params)?;
            let mut parts = arg.splitn(2, ' ');
            let mtime = parts.next().ok_or(ParseErrorKind::InvalidCommand)?.to_string();
            let file: PathBuf = parts.next().ok_or(ParseErrorKind::InvalidCommand)?.into();
            if mtime.len() != 14 || !mtime.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            Command::Mfmt { mtime, file }
        }
        "REST" => {
            let params = parse_to_eol(cmd_params)?;
            let text = str::from_utf8(&params).map_err(|_| ParseErrorKind::InvalidUtf8)?;
            let offset = text.trim().parse::<u64>().map_err(|_| ParseErrorKind::InvalidCommand)?;
            Command::Rest { offset }
        }
        "OPTS" => {
            let params = parse_to_eol(cmd_params)?;
            match params.to_ascii_uppercase().as_slice() {
                b"UTF8 ON" | b"UTF8" => Command::Opts { option: Opt::Utf8 { on: true } },
                b"UTF8 OFF" => Command::Opts { option: Opt::Utf8 { on: false } },
                _ => return Err(ParseErrorKind::InvalidCommand.into()),
            }
        }
        "PBSZ" => {
            let params = parse_to_eol(cmd_params)?;
            if params.is_empty() {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            Command::Pbsz {}
        }
        "PROT" => {
            let params = parse_to_eol(cmd_params)?;
            if params.len() > 1 {
                return Err(ParseErrorKind::InvalidCommand.into());
            }
            match params.first() {
                Some(b'C') | Some(b'c') => Command::Prot { param: ProtParam::Clear },
                Some(b'S') | Some(b's') => Command::Prot { param: ProtParam::Safe },
                Some(b'E') | Some(b'e') => Command::Prot { param: ProtParam::Confidential },
                Some(b'P') | Some(b'p') => Command::Prot { param: ProtParam::Private },
                _ => return Err(ParseErrorKind::InvalidCommand.into()),
            }
        }
        "ABOR" => Command::Abor,
        _ => {
            return Err(ParseErrorKind::UnknownCommand {
                command: cmd_token.to_string(),
            }
            .into());
        }
    };

    Ok(cmd)
}

/// Parse the command-line arguments up to the CR LF terminator. A stray CR or
/// LF inside the argument makes the line invalid.
fn parse_to_eol(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied().peekable();
    while let Some(b) = iter.next() {
        match b {
            b'\r' => {
                return match iter.next() {
                    Some(b'\n') if iter.peek().is_none() => Ok(out),
                    _ => Err(ParseErrorKind::InvalidEol.into()),
                };
            }
            b'\n' => {
                // Be lenient towards bare-LF clients, like the original.
                return if iter.peek().is_none() { Ok(out) } else { Err(ParseErrorKind::InvalidEol.into()) };
            }
            _ => out.push(b),
        }
    }
    // The codec hands us everything up to and including the line feed, so
    // running out of bytes just means the terminator sat right after the verb.
    Ok(out)
}

fn required_utf8(bytes: &[u8]) -> Result<String> {
    let arg = parse_to_eol(bytes)?;
    if arg.is_empty() {
        return Err(ParseErrorKind::InvalidCommand.into());
    }
    String::from_utf8(arg).map_err(|_| ParseErrorKind::InvalidUtf8.into())
}

fn required_utf8_trimmed(bytes: &[u8]) -> Result<String> {
    let arg = required_utf8(bytes)?;
    let trimmed = arg.trim().to_string();
    if trimmed.is_empty() {
        return Err(ParseErrorKind::InvalidCommand.into());
    }
    Ok(trimmed)
}

fn no_params(bytes: &[u8]) -> Result<()> {
    if parse_to_eol(bytes)?.is_empty() {
        Ok(())
    } else {
        Err(ParseErrorKind::InvalidCommand.into())
    }
}

fn normalize(token: &[u8]) -> Result<String> {
    str::from_utf8(token).map(|t| t.to_uppercase()).map_err(|_| ParseErrorKind::InvalidUtf8.into())
}

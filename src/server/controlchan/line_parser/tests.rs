use super::error::ParseErrorKind;
use super::parse;
use crate::server::controlchan::command::{AuthParam, Command, ModeParam, Opt, ProtParam, StruParam, TypeParam};
use crate::server::password::Password;
use bytes::Bytes;
use pretty_assertions::assert_eq;
use std::path::PathBuf;

fn parsed(line: &str) -> Command {
    parse(line.as_bytes().to_vec()).unwrap()
}

fn fails_with(line: &str, kind: ParseErrorKind) {
    let err = parse(line.as_bytes().to_vec()).unwrap_err();
    assert_eq!(err.kind(), &kind, "line: {line:?}");
}

#[test]
fn parse_user_cmd_with_crlf() {
    assert_eq!(
        parsed("USER alice\r\n"),
        Command::User {
            username: Bytes::from("alice")
        }
    );
}

#[test]
fn parse_user_lowercase_verb() {
    assert_eq!(
        parsed("user alice\r\n"),
        Command::User {
            username: Bytes::from("alice")
        }
    );
}

#[test]
fn parse_user_without_name_is_invalid() {
    fails_with("USER \r\n", ParseErrorKind::InvalidCommand);
}

#[test]
fn parse_pass() {
    assert_eq!(
        parsed("PASS s3cret\r\n"),
        Command::Pass {
            password: Password::new("s3cret")
        }
    );
}

#[test]
fn parse_auth_variants() {
    assert_eq!(parsed("AUTH TLS\r\n"), Command::Auth { protocol: AuthParam::Tls });
    assert_eq!(parsed("AUTH tls\r\n"), Command::Auth { protocol: AuthParam::Tls });
    assert_eq!(parsed("AUTH SSL\r\n"), Command::Auth { protocol: AuthParam::Ssl });
    fails_with("AUTH KRB\r\n", ParseErrorKind::InvalidCommand);
}

#[test]
fn parse_type_variants() {
    assert_eq!(parsed("TYPE I\r\n"), Command::Type { param: TypeParam::Image });
    assert_eq!(parsed("TYPE A\r\n"), Command::Type { param: TypeParam::Ascii });
    assert_eq!(parsed("TYPE A N\r\n"), Command::Type { param: TypeParam::Ascii });
    assert_eq!(parsed("TYPE E\r\n"), Command::Type { param: TypeParam::Ebcdic });
    assert_eq!(parsed("TYPE L\r\n"), Command::Type { param: TypeParam::Local });
    fails_with("TYPE X\r\n", ParseErrorKind::InvalidCommand);
}

#[test]
fn parse_stru_and_mode() {
    assert_eq!(parsed("STRU F\r\n"), Command::Stru { structure: StruParam::File });
    assert_eq!(parsed("MODE S\r\n"), Command::Mode { mode: ModeParam::Stream });
    assert_eq!(parsed("MODE Z\r\n"), Command::Mode { mode: ModeParam::Zip });
    fails_with("STRU X\r\n", ParseErrorKind::InvalidCommand);
}

#[test]
fn parse_noop_with_params_is_invalid() {
    fails_with("NOOP hello\r\n", ParseErrorKind::InvalidCommand);
}

#[test]
fn parse_nop_alias() {
    assert_eq!(parsed("NOP\r\n"), Command::Noop);
}

#[test]
fn parse_xpwd_xcwd_xmkd_xrmd_aliases() {
    assert_eq!(parsed("XPWD\r\n"), Command::Pwd);
    assert_eq!(parsed("XCWD /tmp\r\n"), Command::Cwd { path: PathBuf::from("/tmp") });
    assert_eq!(parsed("XMKD new\r\n"), Command::Mkd { path: PathBuf::from("new") });
    assert_eq!(parsed("XRMD old\r\n"), Command::Rmd { path: "old".to_string() });
}

#[test]
fn parse_epsv_forms() {
    assert_eq!(parsed("EPSV\r\n"), Command::Epsv { all: false });
    assert_eq!(parsed("EPSV 2\r\n"), Command::Epsv { all: false });
    assert_eq!(parsed("EPSV ALL\r\n"), Command::Epsv { all: true });
    fails_with("EPSV 9\r\n", ParseErrorKind::InvalidCommand);
}

#[test]
fn parse_port_keeps_raw_address() {
    assert_eq!(
        parsed("PORT 127,0,0,1,200,10\r\n"),
        Command::Port {
            addr: "127,0,0,1,200,10".to_string()
        }
    );
}

#[test]
fn parse_list_with_options_and_path() {
    assert_eq!(
        parsed("LIST -la /tmp\r\n"),
        Command::List {
            options: Some("-la".to_string()),
            path: Some("/tmp".to_string())
        }
    );
    assert_eq!(parsed("LIST\r\n"), Command::List { options: None, path: None });
}

#[test]
fn parse_rest_offset() {
    assert_eq!(parsed("REST 12345\r\n"), Command::Rest { offset: 12345 });
    fails_with("REST banana\r\n", ParseErrorKind::InvalidCommand);
}

#[test]
fn parse_mfmt() {
    assert_eq!(
        parsed("MFMT 20240131120000 notes.txt\r\n"),
        Command::Mfmt {
            mtime: "20240131120000".to_string(),
            file: PathBuf::from("notes.txt")
        }
    );
    fails_with("MFMT 2024 notes.txt\r\n", ParseErrorKind::InvalidCommand);
}

#[test]
fn parse_opts_utf8() {
    assert_eq!(parsed("OPTS UTF8 ON\r\n"), Command::Opts { option: Opt::Utf8 { on: true } });
    assert_eq!(parsed("OPTS utf8 off\r\n"), Command::Opts { option: Opt::Utf8 { on: false } });
    fails_with("OPTS MLST size\r\n", ParseErrorKind::InvalidCommand);
}

#[test]
fn parse_prot_levels() {
    assert_eq!(parsed("PROT P\r\n"), Command::Prot { param: ProtParam::Private });
    assert_eq!(parsed("PROT C\r\n"), Command::Prot { param: ProtParam::Clear });
}

#[test]
fn parse_unknown_command() {
    fails_with(
        "SHUTDOWN now\r\n",
        ParseErrorKind::UnknownCommand {
            command: "SHUTDOWN".to_string(),
        },
    );
}

#[test]
fn stray_cr_in_argument_is_invalid() {
    fails_with("STOR a\rb\r\n", ParseErrorKind::InvalidEol);
}

#[test]
fn bare_lf_is_tolerated() {
    assert_eq!(parsed("SYST\n"), Command::Syst);
    assert_eq!(parsed("RETR file.bin\n"), Command::Retr { path: "file.bin".to_string() });
}

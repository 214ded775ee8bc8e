//! The parsed representation of an FTP command, plus the per-command flag
//! table the dispatcher enforces before a handler ever runs.

use crate::server::password::Password;
use bitflags::bitflags;
use bytes::Bytes;
use std::path::PathBuf;

#[derive(Debug, PartialEq, Clone)]
pub enum AuthParam {
    Ssl,
    Tls,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ProtParam {
    // 'C' - Clear - neither integrity nor privacy
    Clear,
    // 'S' - Safe - integrity without privacy
    Safe,
    // 'E' - Confidential - privacy without integrity
    Confidential,
    // 'P' - Private - integrity and privacy
    Private,
}

#[derive(Debug, PartialEq, Clone)]
pub enum ModeParam {
    Stream,
    Block,
    Compressed,
    Zip,
}

#[derive(Debug, PartialEq, Clone)]
pub enum StruParam {
    File,
    Record,
    Page,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum TypeParam {
    Ascii,
    Image,
    Ebcdic,
    Local,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Opt {
    /// The client wants us to enable or disable UTF-8 treatment of paths.
    Utf8 { on: bool },
}

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    User { username: Bytes },
    Pass { password: Password },
    Auth { protocol: AuthParam },
    Adat { data: String },
    Clnt { client_name: String },
    Syst,
    Stat { path: Option<String> },
    Feat,
    Help,
    Noop,
    Quit,
    Type { param: TypeParam },
    Stru { structure: StruParam },
    Mode { mode: ModeParam },
    Port { addr: String },
    Eprt { addr: String },
    Pasv,
    Epsv { all: bool },
    Retr { path: String },
    Stor { path: String },
    Appe { path: String },
    Allo { size: Option<u64> },
    List { options: Option<String>, path: Option<String> },
    Nlst { path: Option<String> },
    Mlsd { path: Option<String> },
    Mlst { path: Option<String> },
    Pwd,
    Cwd { path: PathBuf },
    Cdup,
    Mkd { path: PathBuf },
    Rmd { path: String },
    Dele { path: String },
    Rnfr { file: PathBuf },
    Rnto { file: PathBuf },
    Size { file: PathBuf },
    Mdtm { file: PathBuf },
    Mfmt { mtime: String, file: PathBuf },
    Rest { offset: u64 },
    Opts { option: Opt },
    Pbsz {},
    Prot { param: ProtParam },
    Abor,
}

bitflags! {
    /// Dispatcher-enforced properties of a command.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CommandFlags: u8 {
        /// The command carries a mandatory argument (enforced by the parser).
        const NEEDS_ARG             = 1 << 0;
        /// Only valid once the session is authenticated.
        const NEEDS_AUTH            = 1 << 1;
        /// Disables pipelining until the command finished.
        const MUST_BE_LAST_IN_QUEUE = 1 << 2;
        /// Only valid on a secured control channel.
        const NEEDS_SECURITY        = 1 << 3;
        /// The argument is whitespace-trimmed before parsing.
        const TRIM_ARG              = 1 << 4;
    }
}

impl Command {
    /// The flag table, mirroring the registered command set.
    pub fn flags(&self) -> CommandFlags {
        use CommandFlags as F;
        match self {
            Command::Abor => F::NEEDS_AUTH,
            Command::Adat { .. } => F::NEEDS_AUTH | F::NEEDS_SECURITY,
            Command::Allo { .. } => F::NEEDS_AUTH,
            Command::Appe { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Auth { .. } => F::NEEDS_ARG | F::MUST_BE_LAST_IN_QUEUE,
            Command::Cdup => F::NEEDS_AUTH,
            Command::Clnt { .. } => F::empty(),
            Command::Cwd { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Dele { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Eprt { .. } => F::NEEDS_ARG | F::TRIM_ARG | F::NEEDS_AUTH,
            Command::Epsv { .. } => F::NEEDS_AUTH,
            Command::Feat => F::empty(),
            Command::Help => F::empty(),
            Command::List { .. } => F::NEEDS_AUTH,
            Command::Mdtm { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Mfmt { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Mkd { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Mlsd { .. } => F::NEEDS_AUTH,
            Command::Mlst { .. } => F::NEEDS_AUTH,
            Command::Mode { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Nlst { .. } => F::NEEDS_AUTH,
            Command::Noop => F::empty(),
            Command::Opts { .. } => F::NEEDS_ARG,
            Command::Pass { .. } => F::empty(),
            Command::Pasv => F::NEEDS_AUTH,
            Command::Pbsz {} => F::NEEDS_ARG | F::NEEDS_SECURITY,
            Command::Port { .. } => F::NEEDS_ARG | F::TRIM_ARG | F::NEEDS_AUTH,
            Command::Prot { .. } => F::NEEDS_ARG | F::NEEDS_SECURITY,
            Command::Pwd => F::NEEDS_AUTH,
            Command::Quit => F::MUST_BE_LAST_IN_QUEUE,
            Command::Rest { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Retr { .. } => F::NEEDS_ARG | F::NEEDS_AUTH | F::MUST_BE_LAST_IN_QUEUE,
            Command::Rmd { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Rnfr { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Rnto { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Size { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Stat { .. } => F::NEEDS_AUTH,
            Command::Stor { .. } => F::NEEDS_ARG | F::NEEDS_AUTH | F::MUST_BE_LAST_IN_QUEUE,
            Command::Stru { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::Syst => F::empty(),
            Command::Type { .. } => F::NEEDS_ARG | F::NEEDS_AUTH,
            Command::User { .. } => F::NEEDS_ARG,
        }
    }

    /// The few commands a not-yet-secured session may issue when the policy
    /// demands TLS before anything else.
    pub fn allowed_before_security(&self) -> bool {
        matches!(self, Command::Auth { .. } | Command::Feat | Command::Quit | Command::Help | Command::Noop)
    }

    /// The verb, for logs and the autoban bookkeeping.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::User { .. } => "USER",
            Command::Pass { .. } => "PASS",
            Command::Auth { .. } => "AUTH",
            Command::Adat { .. } => "ADAT",
            Command::Clnt { .. } => "CLNT",
            Command::Syst => "SYST",
            Command::Stat { .. } => "STAT",
            Command::Feat => "FEAT",
            Command::Help => "HELP",
            Command::Noop => "NOOP",
            Command::Quit => "QUIT",
            Command::Type { .. } => "TYPE",
            Command::Stru { .. } => "STRU",
            Command::Mode { .. } => "MODE",
            Command::Port { .. } => "PORT",
            Command::Eprt { .. } => "EPRT",
            Command::Pasv => "PASV",
            Command::Epsv { .. } => "EPSV",
            Command::Retr { .. } => "RETR",
            Command::Stor { .. } => "STOR",
            Command::Appe { .. } => "APPE",
            Command::Allo { .. } => "ALLO",
            Command::List { .. } => "LIST",
            Command::Nlst { .. } => "NLST",
            Command::Mlsd { .. } => "MLSD",
            Command::Mlst { .. } => "MLST",
            Command::Pwd => "PWD",
            Command::Cwd { .. } => "CWD",
            Command::Cdup => "CDUP",
            Command::Mkd { .. } => "MKD",
            Command::Rmd { .. } => "RMD",
            Command::Dele { .. } => "DELE",
            Command::Rnfr { .. } => "RNFR",
            Command::Rnto { .. } => "RNTO",
            Command::Size { .. } => "SIZE",
            Command::Mdtm { .. } => "MDTM",
            Command::Mfmt { .. } => "MFMT",
            Command::Rest { .. } => "REST",
            Command::Opts { .. } => "OPTS",
            Command::Pbsz {} => "PBSZ",
            Command::Prot { .. } => "PROT",
            Command::Abor => "ABOR",
        }
    }
}

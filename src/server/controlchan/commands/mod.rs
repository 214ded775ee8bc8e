//! One module per FTP verb, each with its `CommandHandler` implementation.

mod abor;
mod adat;
mod allo;
mod appe;
mod auth;
mod cdup;
mod clnt;
mod cwd;
mod dele;
mod eprt;
mod epsv;
mod feat;
mod help;
mod list;
mod mdtm;
mod mfmt;
mod mkd;
mod mlsd;
mod mlst;
mod mode;
mod nlst;
mod noop;
mod opts;
mod pass;
mod passive_common;
mod pasv;
mod pbsz;
mod port;
mod prot;
mod pwd;
mod quit;
mod rest;
mod retr;
mod rmd;
mod rnfr;
mod rnto;
mod size;
mod stat;
mod stor;
mod stru;
mod syst;
mod type_;
mod user;

pub use abor::Abor;
pub use adat::Adat;
pub use allo::Allo;
pub use appe::Appe;
pub use auth::Auth;
pub use cdup::Cdup;
pub use clnt::Clnt;
pub use cwd::Cwd;
pub use dele::Dele;
pub use eprt::Eprt;
pub use epsv::Epsv;
pub use feat::Feat;
pub use help::Help;
pub use list::List;
pub use mdtm::Mdtm;
pub use mfmt::Mfmt;
pub use mkd::Mkd;
pub use mlsd::Mlsd;
pub use mlst::Mlst;
pub use mode::Mode;
pub use nlst::Nlst;
pub use noop::Noop;
pub use opts::Opts;
pub use pass::Pass;
pub use pasv::Pasv;
pub use pbsz::Pbsz;
pub use port::Port;
pub use prot::Prot;
pub use pwd::Pwd;
pub use quit::Quit;
pub use rest::Rest;
pub use retr::Retr;
pub use rmd::Rmd;
pub use rnfr::Rnfr;
pub use rnto::Rnto;
pub use size::Size;
pub use stat::Stat;
pub use stor::Stor;
pub use stru::Stru;
pub use syst::Syst;
pub use type_::Type;
pub use user::User;

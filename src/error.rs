use core::result;
use thiserror::Error;

pub type Result<T> = result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("IO error reading {path}: {message}")]
    Io { path: String, message: String },
    #[error("XML error: {0}")]
    Xml(String),
    #[error("This is not a MuseScore 3 file, version {0}")]
    WrongVersion(String),
    #[error("Missing required element <{0}>")]
    MissingElement(&'static str),
    #[error("Staff has no parseable id: {0:?}")]
    BadStaffId(String),
    #[error("Staff {0} contains no measures")]
    EmptyStaff(usize),
    #[error("Time signature not defined in the first measure of staff {0}")]
    MissingTimeSig(usize),
    #[error("Staves have different measure counts: {0:?}")]
    StaffMeasureMismatch(Vec<usize>),
    #[error("ParseIntError")]
    ParseInt(#[from] std::num::ParseIntError),
}

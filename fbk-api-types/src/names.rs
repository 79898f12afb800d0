use std::fmt;

use anyhow::{bail, Error};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9]+(-[A-Za-z0-9]+)*$").unwrap();
}

fn check_name(what: &str, name: &str) -> Result<(), Error> {
    if !NAME_RE.is_match(name) {
        bail!("invalid {what} name '{name}' (expected [A-Za-z0-9]+(-[A-Za-z0-9]+)*)");
    }
    Ok(())
}

macro_rules! name_newtype {
    ($name:ident, $what:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Result<Self, Error> {
                let name = name.into();
                check_name($what, &name)?;
                Ok(Self(name))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(value: String) -> Result<Self, Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

name_newtype!(HostName, "host");
name_newtype!(ShareName, "share");

#[test]
fn accepts_plain_and_hyphenated_names() {
    assert!(HostName::new("h1").is_ok());
    assert!(HostName::new("web-server-1").is_ok());
}

#[test]
fn rejects_leading_or_double_hyphen_and_other_separators() {
    assert!(HostName::new("-h1").is_err());
    assert!(HostName::new("h1--h2").is_err());
    assert!(HostName::new("h1.example").is_err());
    assert!(HostName::new("").is_err());
}

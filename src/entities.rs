// Copyright (C) 2025 the bloglist developers
//
// This file is part of bloglist.
//
// bloglist is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// bloglist is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with bloglist.  If not,
// see <http://www.gnu.org/licenses/>.

//! # bloglist models
//!
//! ## Introduction
//!
//! I hate these sort of "catch-all" modules named "models" or "entities", but these types are
//! truly foundational: users, blog entries, and the refined types out of which they're built.

use std::{fmt::Display, ops::Deref, str::FromStr};

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use password_hash::{rand_core::OsRng, PasswordHashString, SaltString};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{prelude::*, Backtrace, IntoError};
use tap::Pipe;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Incorrect password"))]
    BadPassword { backtrace: Backtrace },
    #[snafu(display("Failed to parse {text} as an URL: {source}"))]
    BadUrl {
        text: String,
        source: url::ParseError,
        backtrace: Backtrace,
    },
    #[snafu(display("{name} is not a valid bloglist username"))]
    BadUsername { name: String },
    #[snafu(display("Couldn't verify the password for {username}: {source}"))]
    CheckPassword {
        username: Username,
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to hash password: {source}"))]
    HashPassword {
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Passwords must be at least {MIN_PASSWORD_LENGTH} characters"))]
    PasswordTooShort { backtrace: Backtrace },
    #[snafu(display("{name} is too short to be a bloglist username"))]
    UsernameTooShort { name: String },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

fn mk_serde_de_err<'de, D: serde::Deserializer<'de>>(err: impl std::error::Error) -> D::Error {
    <D::Error as serde::de::Error>::custom(format!("{:?}", err))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// identifier!
///
/// Use this to declare a type intended to be used as an opaque identifier for some other sort of
/// entity. The backing store assigns no ids of its own, so it is up to the application to mint
/// them; as is conventional, they're UUIDs. I could have just used [Uuid] directly, but I couldn't
/// bring myself to use the same type to represent identifiers for users and blogs at the same
/// time.
macro_rules! define_id {
    ($type_name:ident) => {
        #[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
        #[serde(transparent)]
        pub struct $type_name(Uuid);
        impl $type_name {
            pub fn new() -> $type_name {
                $type_name(Uuid::new_v4())
            }
            pub fn from_raw_string(s: &str) -> StdResult<$type_name, uuid::Error> {
                Ok($type_name(Uuid::parse_str(s)?))
            }
        }
        impl Default for $type_name {
            fn default() -> Self {
                Self::new()
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_hyphenated())
            }
        }
    };
}

define_id!(UserId);
define_id!(BlogId);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Username                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

// bloglist usernames must be ASCII, may be from three to sixty-four characters in length, and
// must match the regex "^[a-zA-Z][-_.a-zA-Z0-9]+$".
const MIN_USERNAME_LENGTH: usize = 3;
const MAX_USERNAME_LENGTH: usize = 64;

lazy_static! {
    static ref USERNAME: Regex = Regex::new("^[a-zA-Z][-_.a-zA-Z0-9]+$").unwrap(/* known good */);
}

fn check_username(s: &str) -> Result<()> {
    ensure!(
        s.chars().count() >= MIN_USERNAME_LENGTH,
        UsernameTooShortSnafu { name: s.to_owned() }
    );
    ensure!(
        s.is_ascii() && s.len() <= MAX_USERNAME_LENGTH && USERNAME.is_match(s),
        BadUsernameSnafu { name: s.to_owned() }
    );
    Ok(())
}

/// A refined type representing a bloglist username
// Boy... writing refined types in Rust involves a *lot* of boilerplate. I have to wonder if there
// isn't a better way...
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Construct a [Username] from a `&str`
    ///
    /// Use this constructor to create a [Username] instance by copying from a reference to [str].
    /// To *move* a [String] into a [Username] (with validity checking) use
    /// [TryFrom::try_from()].
    pub fn new(name: &str) -> Result<Username> {
        check_username(name)?;
        Ok(Username(name.to_owned()))
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for Username {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit `Username`
impl<'de> Deserialize<'de> for Username {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Username::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Username {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Username::new(s)
    }
}

impl TryFrom<String> for Username {
    type Error = Error;

    fn try_from(name: String) -> std::result::Result<Self, Self::Error> {
        check_username(&name)?;
        Ok(Username(name))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            BlogUrl                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Newtype to work around Rust's orphaned traits rule
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct BlogUrl(Url);

impl BlogUrl {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit URL
impl<'de> Deserialize<'de> for BlogUrl {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        BlogUrl::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Deref for BlogUrl {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl AsRef<str> for BlogUrl {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Display for BlogUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Url> for BlogUrl {
    fn from(value: Url) -> Self {
        Self(value)
    }
}

impl From<&Url> for BlogUrl {
    fn from(value: &Url) -> Self {
        Self(value.clone())
    }
}

impl FromStr for BlogUrl {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        BlogUrl::try_from(s.to_owned())
    }
}

impl TryFrom<String> for BlogUrl {
    type Error = Error;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Ok(BlogUrl(Url::parse(&s).context(BadUrlSnafu { text: s })?))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              User                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

const MIN_PASSWORD_LENGTH: usize = 3;

/// Apply password validation rules
///
/// At this time, the only rule on passwords is a minimum length of three characters; they are
/// otherwise arbitrary UTF-8 text.
fn validate_password(password: &SecretString) -> Result<()> {
    ensure!(
        password.expose_secret().chars().count() >= MIN_PASSWORD_LENGTH,
        PasswordTooShortSnafu
    );
    Ok(())
}

/// Represents a bloglist user
#[derive(Clone, Debug)]
pub struct User {
    id: UserId,
    username: Username,
    display_name: String,
    password_hash: PasswordHashString,
}

impl User {
    /// Create a new [User]
    ///
    /// This constructor will create a new [User] instance without validating uniqueness of the
    /// username (that's the storage layer's job). It will validate the password, and hash it;
    /// the plaintext is never stored.
    pub fn new(
        username: &Username,
        password: &SecretString,
        display_name: Option<&str>,
    ) -> Result<User> {
        validate_password(password)?;
        let password_hash = User::hash_password(password)?;
        Ok(User {
            id: UserId::new(),
            username: username.clone(),
            display_name: display_name.map(str::to_owned).unwrap_or(username.to_string()),
            password_hash,
        })
    }
    /// Validate a password
    pub fn check_password(&self, password: SecretString) -> Result<()> {
        match Argon2::default().verify_password(
            password.expose_secret().as_bytes(),
            &self.password_hash.password_hash(),
        ) {
            Ok(_) => Ok(()),
            Err(password_hash::errors::Error::Password) => BadPasswordSnafu.fail(),
            Err(err) => Err(CheckPasswordSnafu {
                username: self.username.clone(),
            }
            .into_error(err)),
        }
    }
    pub fn display_name(&self) -> String {
        self.display_name.clone()
    }
    pub fn id(&self) -> UserId {
        self.id
    }
    pub fn username(&self) -> &Username {
        &self.username
    }
    /// Hash a password
    ///
    /// This function will first salt the password, then hash it using Argon2id with the default
    /// version (19 at the time of this writing) & parameters (m=19456, t=2, p=1 at the time of
    /// this writing). Those parameters comport with the OWASP [recommendations].
    ///
    /// [recommendations]: https://cheatsheetseries.owasp.org/cheatsheets/Password_Storage_Cheat_Sheet.html#password-hashing-algorithms
    fn hash_password(password: &SecretString) -> Result<PasswordHashString> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .context(HashPasswordSnafu)?
            .serialize()
            .pipe(Ok)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Blog                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Represents a single blog-list entry
///
/// `author` is a display string, not a reference to a [User]; the user who *submitted* the entry
/// is recorded separately in `user`. `likes` is a non-negative count by construction (the
/// ingestion boundary rejects anything else before a [Blog] is ever built).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Blog {
    id: BlogId,
    user: UserId,
    title: String,
    author: String,
    url: BlogUrl,
    likes: u64,
    posted: DateTime<Utc>,
}

impl Blog {
    pub fn new(
        user: &UserId,
        title: &str,
        author: &str,
        url: &BlogUrl,
        likes: u64,
        posted: &DateTime<Utc>,
    ) -> Blog {
        Blog {
            id: BlogId::new(),
            user: *user,
            title: title.to_owned(),
            author: author.to_owned(),
            url: url.clone(),
            likes,
            posted: *posted,
        }
    }
    pub fn author(&self) -> &str {
        &self.author
    }
    pub fn id(&self) -> BlogId {
        self.id
    }
    pub fn likes(&self) -> u64 {
        self.likes
    }
    pub fn posted(&self) -> DateTime<Utc> {
        self.posted
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    /// Replace every caller-settable field in place; identity, submitter & post time are fixed
    pub fn update(&mut self, title: &str, author: &str, url: &BlogUrl, likes: u64) {
        self.title = title.to_owned();
        self.author = author.to_owned();
        self.url = url.clone();
        self.likes = likes;
    }
    pub fn url(&self) -> &BlogUrl {
        &self.url
    }
    pub fn user(&self) -> UserId {
        self.user
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn username() {
        assert!(Username::new("").is_err());
        assert!(matches!(
            Username::new("ab"),
            Err(Error::UsernameTooShort { .. })
        ));
        assert!(Username::new("4chan").is_err());
        assert!(Username::new("john doe").is_err());
        assert!(Username::new("jöhndöe").is_err());
        assert!(Username::new("mluukkai").is_ok());
        assert!(Username::new("sp1ff").is_ok());
        assert!(Username::new("john.doe_the-3rd").is_ok());
        // Sixty-five characters-- one too many.
        assert!(Username::new(&format!("a{}", "b".repeat(64))).is_err());
    }

    #[test]
    fn blog_url() {
        assert!(BlogUrl::from_str("https://reactpatterns.com/").is_ok());
        assert!(matches!(
            BlogUrl::from_str("not an url"),
            Err(Error::BadUrl { .. })
        ));
    }

    #[test]
    fn passwords() {
        let username = Username::new("mluukkai").unwrap(/* known good */);
        assert!(matches!(
            User::new(&username, &"q".to_string().into(), None),
            Err(Error::PasswordTooShort { .. })
        ));

        let user = User::new(&username, &"salainen".to_string().into(), Some("Matti Luukkainen"))
            .unwrap(/* known good */);
        assert_eq!(user.display_name(), "Matti Luukkainen");
        assert!(user.check_password("salainen".to_string().into()).is_ok());
        assert!(matches!(
            user.check_password("salaisuus".to_string().into()),
            Err(Error::BadPassword { .. })
        ));
    }

    #[test]
    fn display_name_defaults_to_username() {
        let username = Username::new("mluukkai").unwrap(/* known good */);
        let user = User::new(&username, &"salainen".to_string().into(), None).unwrap(/* known good */);
        assert_eq!(user.display_name(), "mluukkai");
    }
}

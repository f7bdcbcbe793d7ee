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

//! # storage
//!
//! Abstractions for the bloglist storage layer.
//!
//! Application code writes to this generic API; a particular *implementation* of it is chosen at
//! startup. There's exactly one implementation today (the in-memory [Store]), but the handlers
//! shouldn't need to know that.
//!
//! [Store]: crate::memory::Store

use crate::entities::{Blog, BlogId, BlogUrl, User, UserId, Username};

use async_trait::async_trait;
use snafu::{Backtrace, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("The username {username} is already claimed"))]
    UsernameClaimed {
        username: Username,
        backtrace: Backtrace,
    },
}

/// Caller-settable fields of a [Blog], for whole-record updates
#[derive(Clone, Debug)]
pub struct BlogPatch {
    pub title: String,
    pub author: String,
    pub url: BlogUrl,
    pub likes: u64,
}

#[async_trait]
pub trait Backend {
    /// Add a [Blog] to the collection
    async fn add_blog(&self, blog: &Blog) -> Result<(), Error>;
    /// Add a [User]; fails with [UsernameClaimed](Error::UsernameClaimed) if the username is
    /// already taken
    async fn add_user(&self, user: &User) -> Result<(), Error>;
    /// Retrieve the full collection as an ordered sequence (in order of submission). This is the
    /// feed consumed by the statistics endpoint.
    async fn all_blogs(&self) -> Result<Vec<Blog>, Error>;
    /// Retrieve a single [Blog] by id. None means there is no blog with that id.
    async fn blog_for_id(&self, id: &BlogId) -> Result<Option<Blog>, Error>;
    /// Retrieve the blogs submitted by the given user, in order of submission
    async fn blogs_for_user(&self, userid: &UserId) -> Result<Vec<Blog>, Error>;
    /// Remove a [Blog] by id; returns true if anything was actually removed. Deletion is
    /// idempotent.
    async fn delete_blog(&self, id: &BlogId) -> Result<bool, Error>;
    /// Replace the caller-settable fields of the [Blog] named by `id`, in place. None means there
    /// is no blog with that id.
    async fn update_blog(&self, id: &BlogId, patch: BlogPatch) -> Result<Option<Blog>, Error>;
    /// Retrieve a [User] instance by id. None means there is no user with that id.
    async fn user_for_id(&self, id: &UserId) -> Result<Option<User>, Error>;
    /// Retrieve a [User] instance given a textual username. None means there is no user by that
    /// name.
    async fn user_for_name(&self, name: &str) -> Result<Option<User>, Error>;
    /// Retrieve all users, in order of signup
    async fn users(&self) -> Result<Vec<User>, Error>;
}

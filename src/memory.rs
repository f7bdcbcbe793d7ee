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

//! # memory
//!
//! The in-memory implementation of the [storage](crate::storage) API.
//!
//! bloglist makes no durability guarantees, so the entire collection lives in two [Vec]s behind a
//! [tokio::sync::RwLock]. Keeping [Vec]s (rather than maps) preserves submission order, which is
//! the order in which [all_blogs](crate::storage::Backend::all_blogs) is contracted to yield the
//! collection. The linear scans this implies are a non-issue at the collection sizes this service
//! is built for.

use crate::{
    entities::{Blog, BlogId, User, UserId},
    storage::{Backend, BlogPatch, Error, UsernameClaimedSnafu},
};

use async_trait::async_trait;
use snafu::prelude::*;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    users: Vec<User>,
    blogs: Vec<Blog>,
}

/// The sole shipped storage backend
#[derive(Debug, Default)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Store {
        Store::default()
    }
}

#[async_trait]
impl Backend for Store {
    async fn add_blog(&self, blog: &Blog) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        tables.blogs.push(blog.clone());
        Ok(())
    }
    async fn add_user(&self, user: &User) -> Result<(), Error> {
        let mut tables = self.tables.write().await;
        ensure!(
            !tables.users.iter().any(|u| u.username() == user.username()),
            UsernameClaimedSnafu {
                username: user.username().clone()
            }
        );
        tables.users.push(user.clone());
        Ok(())
    }
    async fn all_blogs(&self) -> Result<Vec<Blog>, Error> {
        Ok(self.tables.read().await.blogs.clone())
    }
    async fn blog_for_id(&self, id: &BlogId) -> Result<Option<Blog>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .blogs
            .iter()
            .find(|b| b.id() == *id)
            .cloned())
    }
    async fn blogs_for_user(&self, userid: &UserId) -> Result<Vec<Blog>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .blogs
            .iter()
            .filter(|b| b.user() == *userid)
            .cloned()
            .collect())
    }
    async fn delete_blog(&self, id: &BlogId) -> Result<bool, Error> {
        let mut tables = self.tables.write().await;
        let before = tables.blogs.len();
        tables.blogs.retain(|b| b.id() != *id);
        Ok(tables.blogs.len() != before)
    }
    async fn update_blog(&self, id: &BlogId, patch: BlogPatch) -> Result<Option<Blog>, Error> {
        let mut tables = self.tables.write().await;
        match tables.blogs.iter_mut().find(|b| b.id() == *id) {
            Some(blog) => {
                blog.update(&patch.title, &patch.author, &patch.url, patch.likes);
                Ok(Some(blog.clone()))
            }
            None => Ok(None),
        }
    }
    async fn user_for_id(&self, id: &UserId) -> Result<Option<User>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .iter()
            .find(|u| u.id() == *id)
            .cloned())
    }
    async fn user_for_name(&self, name: &str) -> Result<Option<User>, Error> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .iter()
            .find(|u| u.username().as_ref() == name)
            .cloned())
    }
    async fn users(&self) -> Result<Vec<User>, Error> {
        Ok(self.tables.read().await.users.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::{BlogUrl, Username};

    use chrono::Utc;
    use std::str::FromStr;

    fn mk_user(name: &str) -> User {
        User::new(
            &Username::new(name).unwrap(),
            &"salainen".to_string().into(),
            None,
        )
        .unwrap()
    }

    fn mk_blog(user: &UserId, title: &str, likes: u64) -> Blog {
        Blog::new(
            user,
            title,
            "Edsger W. Dijkstra",
            &BlogUrl::from_str("https://www.cs.utexas.edu/~EWD/").unwrap(),
            likes,
            &Utc::now(),
        )
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let store = Store::new();
        store.add_user(&mk_user("mluukkai")).await.unwrap();
        assert!(matches!(
            store.add_user(&mk_user("mluukkai")).await,
            Err(Error::UsernameClaimed { .. })
        ));
        assert!(store.add_user(&mk_user("hellas")).await.is_ok());
        assert_eq!(store.users().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn users_are_found_by_name_and_id() {
        let store = Store::new();
        let user = mk_user("mluukkai");
        store.add_user(&user).await.unwrap();
        assert_eq!(
            store.user_for_name("mluukkai").await.unwrap().unwrap().id(),
            user.id()
        );
        assert!(store.user_for_name("hellas").await.unwrap().is_none());
        assert!(store.user_for_id(&user.id()).await.unwrap().is_some());
        assert!(store.user_for_id(&UserId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blogs_come_back_in_submission_order() {
        let store = Store::new();
        let user = mk_user("mluukkai");
        store.add_user(&user).await.unwrap();
        for title in ["first", "second", "third"] {
            store.add_blog(&mk_blog(&user.id(), title, 0)).await.unwrap();
        }
        let titles: Vec<String> = store
            .all_blogs()
            .await
            .unwrap()
            .iter()
            .map(|b| b.title().to_owned())
            .collect();
        assert_eq!(titles, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn blogs_can_be_updated_and_deleted() {
        let store = Store::new();
        let user = mk_user("mluukkai");
        store.add_user(&user).await.unwrap();
        let blog = mk_blog(&user.id(), "First class tests", 10);
        store.add_blog(&blog).await.unwrap();

        let patch = BlogPatch {
            title: "First class tests".to_owned(),
            author: "Robert C. Martin".to_owned(),
            url: BlogUrl::from_str("http://blog.cleancoder.com/").unwrap(),
            likes: 11,
        };
        let updated = store
            .update_blog(&blog.id(), patch.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.likes(), 11);
        assert_eq!(updated.author(), "Robert C. Martin");
        assert_eq!(updated.id(), blog.id());

        assert!(store.update_blog(&BlogId::new(), patch).await.unwrap().is_none());

        assert!(store.delete_blog(&blog.id()).await.unwrap());
        assert!(!store.delete_blog(&blog.id()).await.unwrap());
        assert!(store.all_blogs().await.unwrap().is_empty());
    }
}

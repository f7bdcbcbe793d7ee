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

//! # bloglist
//!
//! A small, multi-user blog-list service: blog entries live in an in-memory document store, users
//! sign-up & login over a JSON REST API, and a statistics endpoint computes simple aggregates over
//! the full collection.
pub mod authn;
pub mod blogs;
pub mod entities;
pub mod http;
pub mod memory;
pub mod metrics;
pub mod stats;
pub mod storage;
pub mod token;
pub mod users;

// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! REST services built on the request pipeline

pub mod auth;
pub mod posture;

pub use auth::{AuthService, UserProfile};
pub use posture::{DailyScore, PostureApi, PostureStats, ScoreRecord, SessionDetail, SessionRecord};

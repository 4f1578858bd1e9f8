// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! REST plumbing: transport seam, authenticated pipeline, token refresh

pub mod pipeline;
pub mod refresh;
pub mod transport;

pub use pipeline::RequestPipeline;
pub use refresh::REFRESH_PATH;
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};

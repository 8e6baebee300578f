// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

pub mod aggregator;
pub mod collector;
pub mod event;
pub mod sender;
pub mod window;

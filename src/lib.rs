// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

pub mod channel;
pub mod configs;
pub mod connection;
pub mod consumer;
pub mod errors;
pub mod handler;
pub mod publisher;
pub mod topology;

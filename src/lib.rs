//! Gatekeeper - request and content admission guards
//!
//! This crate provides two independent guards for an embedding service:
//! a fixed-window rate limiter whose counts live in a shared store (Redis),
//! so every instance of a service agrees on them, and a sensitive-word
//! filter that redacts keywords from text in a single pass.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod wordfilter;

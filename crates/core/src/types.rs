/// Queue-assigned job identifiers are opaque strings
/// (`<template>-<millis>-<suffix>` for jobs created by the producer).
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

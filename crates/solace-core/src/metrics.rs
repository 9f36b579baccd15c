//! Admin usage metrics.
//!
//! The store produces raw counts; this module turns them into the ratios
//! shown on the admin dashboard.

use serde::{Deserialize, Serialize};

/// Messages-per-user aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageMessages {
    /// Rounded to two decimals
    pub average_messages_per_user: f64,
    pub total_messages: u64,
    pub unique_users: u64,
}

impl AverageMessages {
    pub fn compute(total_messages: u64, unique_users: u64) -> Self {
        let average = if unique_users == 0 {
            0.0
        } else {
            round2(total_messages as f64 / unique_users as f64)
        };

        Self {
            average_messages_per_user: average,
            total_messages,
            unique_users,
        }
    }
}

/// Raw counts gathered from the store for the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricCounts {
    pub total_users: u64,
    /// Distinct users active in the last day / week / month
    pub dau: u64,
    pub wau: u64,
    pub mau: u64,
    pub new_24h: u64,
    pub new_7d: u64,
    pub active_dialogs_24h: u64,
    pub sessions_7d: u64,
    pub avg_session_len: Option<f64>,
    pub portraits_7d: u64,
    /// Mean mood score over the last 7 days
    pub avg_score_7d: Option<f64>,
    /// Mean mood score over the 7 days before that
    pub prev_avg_score_7d: Option<f64>,
    pub onboarding_completed: u64,
}

/// Dashboard metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminMetrics {
    pub total_users: u64,
    pub dau: u64,
    pub wau: u64,
    pub mau: u64,
    pub new_24h: u64,
    pub new_7d: u64,
    pub active_dialogs_24h: u64,
    pub avg_msgs: AverageMessages,
    pub sessions_7d: u64,
    pub avg_session_len: f64,
    pub portraits_7d: u64,
    pub avg_score_7d: f64,
    /// Relative week-over-week change of the mean mood score
    pub trend: f64,
    pub onboarding_conv: f64,
}

impl AdminMetrics {
    pub fn from_counts(counts: MetricCounts, avg_msgs: AverageMessages) -> Self {
        let avg_score_7d = counts.avg_score_7d.unwrap_or(0.0);
        let prev = counts.prev_avg_score_7d.unwrap_or(0.0);

        Self {
            total_users: counts.total_users,
            dau: counts.dau,
            wau: counts.wau,
            mau: counts.mau,
            new_24h: counts.new_24h,
            new_7d: counts.new_7d,
            active_dialogs_24h: counts.active_dialogs_24h,
            avg_msgs,
            sessions_7d: counts.sessions_7d,
            avg_session_len: counts.avg_session_len.unwrap_or(0.0),
            portraits_7d: counts.portraits_7d,
            avg_score_7d,
            trend: relative_change(avg_score_7d, prev),
            onboarding_conv: conversion(counts.onboarding_completed, counts.total_users),
        }
    }
}

/// `(current - previous) / previous`, or 0 when there is no baseline.
pub fn relative_change(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        (current - previous) / previous
    } else {
        0.0
    }
}

/// Share of users who finished onboarding. An empty user base counts as one
/// user so the ratio stays finite.
pub fn conversion(completed: u64, total: u64) -> f64 {
    completed as f64 / total.max(1) as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

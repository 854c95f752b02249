//! Utility modules

pub mod cron_helper;

pub use cron_helper::{
    calculate_next_scheduled_time, calculate_next_scheduled_time_validated, format_time_until,
};

//! Booking store
//!
//! Available time slots per day plus the appointments booked so far. The
//! caller creates one store and hands it to the state graph; machines only
//! reach it through tool-call hooks.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub date: String,
    pub time: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
}

#[derive(Debug, Default)]
struct Bookings {
    slots: BTreeMap<NaiveDate, Vec<String>>,
    appointments: Vec<Appointment>,
}

#[derive(Debug, Default)]
pub struct BookingStore {
    inner: Mutex<Bookings>,
}

impl BookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the demo calendar
    pub fn demo() -> Self {
        let store = Self::new();
        for (date, times) in [
            ("2024-12-23", ["10:00", "11:00", "14:00", "15:00"]),
            ("2024-12-24", ["09:00", "10:00", "11:00", "14:00"]),
            ("2024-12-25", ["11:00", "13:00", "14:00", "16:00"]),
            ("2024-12-26", ["10:00", "12:00", "15:00", "16:00"]),
        ] {
            if let Some(date) = parse_date(date) {
                store.open_slots(date, times);
            }
        }
        store
    }

    pub fn open_slots<I, S>(&self, date: NaiveDate, times: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut bookings = self.lock();
        let day = bookings.slots.entry(date).or_default();
        for time in times {
            let time = time.into();
            if !day.contains(&time) {
                day.push(time);
            }
        }
        day.sort();
    }

    /// Free slots for a `YYYY-MM-DD` date; empty for unknown or malformed dates
    pub fn check_availability(&self, date: &str) -> Vec<String> {
        let Some(date) = parse_date(date) else {
            return Vec::new();
        };
        self.lock().slots.get(&date).cloned().unwrap_or_default()
    }

    /// Book the slot if it is still free. Returns whether it was booked.
    pub fn schedule_appointment(&self, appointment: Appointment) -> bool {
        let Some(date) = parse_date(&appointment.date) else {
            tracing::warn!(date = %appointment.date, "Rejecting booking with malformed date");
            return false;
        };

        let mut bookings = self.lock();
        let Some(day) = bookings.slots.get_mut(&date) else {
            return false;
        };
        let Some(index) = day.iter().position(|t| *t == appointment.time) else {
            return false;
        };
        day.remove(index);

        tracing::info!(
            date = %appointment.date,
            time = %appointment.time,
            customer = %appointment.customer_name,
            "Appointment booked"
        );
        bookings.appointments.push(appointment);
        true
    }

    pub fn appointments(&self) -> Vec<Appointment> {
        self.lock().appointments.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Bookings> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), DATE_FORMAT).ok()
}

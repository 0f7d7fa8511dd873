use crate::domain::learning::{Assignment, LiveSession, UserSubscription};
use crate::domain::plan::Plan;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct PlanRow<'a> {
    id: u64,
    #[serde(rename = "type")]
    plan_type: &'a str,
    amount: String,
    currency: &'a str,
    duration: &'a str,
    active: bool,
    benefits: String,
}

#[derive(Serialize)]
struct AssignmentRow<'a> {
    id: u64,
    title: &'a str,
    status: &'a str,
    due: String,
}

#[derive(Serialize)]
struct LiveSessionRow<'a> {
    id: u64,
    title: &'a str,
    starts: String,
    meeting_url: &'a str,
    recording_url: &'a str,
}

#[derive(Serialize)]
struct SubscriptionRow<'a> {
    id: u64,
    #[serde(rename = "type")]
    plan_type: &'a str,
    status: &'a str,
    start: String,
    end: String,
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value.map(|t| t.to_rfc3339()).unwrap_or_default()
}

/// Writes dashboard listings as CSV, one record per row.
pub struct ListingWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ListingWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::WriterBuilder::new().from_writer(sink),
        }
    }

    pub fn write_plans(&mut self, plans: &[Plan]) -> Result<()> {
        for plan in plans {
            let amount = plan
                .amount()
                .map(|a| a.normalize().to_string())
                .unwrap_or_default();
            self.writer.serialize(PlanRow {
                id: plan.id,
                plan_type: &plan.plan_type,
                amount,
                currency: &plan.currency,
                duration: &plan.duration,
                active: plan.is_active,
                benefits: plan.benefits.join("; "),
            })?;
        }
        self.flush()
    }

    pub fn write_assignments(&mut self, assignments: &[Assignment]) -> Result<()> {
        for assignment in assignments {
            self.writer.serialize(AssignmentRow {
                id: assignment.id,
                title: &assignment.title,
                status: &assignment.status,
                due: timestamp(assignment.due_date),
            })?;
        }
        self.flush()
    }

    pub fn write_live_sessions(&mut self, sessions: &[LiveSession]) -> Result<()> {
        for session in sessions {
            self.writer.serialize(LiveSessionRow {
                id: session.id,
                title: &session.title,
                starts: timestamp(session.start_time),
                meeting_url: session.meeting_url.as_deref().unwrap_or_default(),
                recording_url: session.recording_url.as_deref().unwrap_or_default(),
            })?;
        }
        self.flush()
    }

    pub fn write_subscriptions(&mut self, subscriptions: &[UserSubscription]) -> Result<()> {
        for subscription in subscriptions {
            self.writer.serialize(SubscriptionRow {
                id: subscription.id,
                plan_type: &subscription.plan_type,
                status: &subscription.status,
                start: timestamp(subscription.start_date),
                end: timestamp(subscription.end_date),
            })?;
        }
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

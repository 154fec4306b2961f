use crate::domain::application::Application;
use crate::error::{PipelineError, Result};
use std::io::Write;

/// Writes the post-replay application summary as CSV.
pub struct SummaryWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> SummaryWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_applications(&mut self, applications: Vec<Application>) -> Result<()> {
        self.writer
            .write_record([
                "id",
                "status",
                "order_id",
                "amount",
                "permit_expires_at",
                "queue_duration_ms",
                "failure_reason",
            ])
            .map_err(csv_err)?;
        for app in applications {
            self.writer
                .write_record([
                    app.id.to_string(),
                    serde_json::to_value(app.status)?
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                    app.payment_order_id.unwrap_or_default(),
                    app.amount
                        .map(|a| a.value().to_string())
                        .unwrap_or_default(),
                    app.permit_expires_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_default(),
                    app.queue_duration_ms
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                    app.failure_reason.unwrap_or_default(),
                ])
                .map_err(csv_err)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

fn csv_err(e: csv::Error) -> PipelineError {
    PipelineError::Storage(format!("CSV write error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::application::ApplicationStatus;
    use chrono::Utc;

    #[test]
    fn test_summary_rows() {
        let mut app = Application::new(7, Utc::now());
        app.status = ApplicationStatus::PermitReady;
        app.payment_order_id = Some("ord_7".to_string());
        app.queue_duration_ms = Some(120);

        let mut out = Vec::new();
        SummaryWriter::new(&mut out)
            .write_applications(vec![app])
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("id,status,order_id"));
        assert!(text.contains("7,PERMIT_READY,ord_7"));
        assert!(text.contains(",120,"));
    }
}

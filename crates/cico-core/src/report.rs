//! Attendance record → outbound payloads.

use std::sync::Arc;

use tracing::warn;

use crate::{
    domain::Destination,
    formatting::format_record_text,
    messaging::types::{Media, ParseMode},
    ports::ImageProcessor,
    records::AttendanceRecord,
    sender::{Payload, RateLimitedSender, SendError},
};

pub const CHECK_IN_CAPTION: &str = "Check-In Image";
pub const CHECK_OUT_CAPTION: &str = "Check-Out Image";

/// A record rendered for delivery: MarkdownV2 text plus captioned images, in send order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormattedReport {
    pub text: String,
    pub media: Vec<(Media, &'static str)>,
}

impl FormattedReport {
    /// Images first, then the text block.
    pub fn payloads(&self) -> Vec<Payload> {
        let mut out: Vec<Payload> = self
            .media
            .iter()
            .map(|(media, caption)| Payload::Photo {
                media: media.clone(),
                caption: Some(caption.to_string()),
            })
            .collect();
        out.push(Payload::Text {
            body: self.text.clone(),
            mode: ParseMode::MarkdownV2,
        });
        out
    }
}

pub struct RecordFormatter {
    images: Arc<dyn ImageProcessor>,
}

impl RecordFormatter {
    pub fn new(images: Arc<dyn ImageProcessor>) -> Self {
        Self { images }
    }

    pub async fn format(&self, record: &AttendanceRecord, stretch: bool) -> FormattedReport {
        let mut media = Vec::new();
        for (image_ref, caption) in [
            (&record.check_in_image, CHECK_IN_CAPTION),
            (&record.check_out_image, CHECK_OUT_CAPTION),
        ] {
            if let Some(image_ref) = image_ref {
                media.push((self.images.process(image_ref, stretch).await, caption));
            }
        }

        FormattedReport {
            text: format_record_text(record),
            media,
        }
    }
}

/// Per-record delivery counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub sent: usize,
    pub skipped: usize,
}

/// Format one record and push every payload through the sender.
///
/// Per-payload failures are logged and skipped; a transport failure stops the record
/// and is returned to the caller. Payloads already sent stay sent.
pub async fn deliver_record(
    formatter: &RecordFormatter,
    sender: &RateLimitedSender,
    record: &AttendanceRecord,
    dest: &Destination,
    stretch: bool,
) -> Result<DeliveryReport, SendError> {
    let report = formatter.format(record, stretch).await;
    let mut out = DeliveryReport::default();

    for payload in report.payloads() {
        match sender.send(dest, &payload).await {
            Ok(_) => out.sent += 1,
            Err(e) if e.is_per_payload() => {
                warn!(%dest, date = %record.date, error = %e, "skipping payload");
                out.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(out)
}

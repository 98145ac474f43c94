use anyhow::Result;
use std::io::Write;

use crate::application::HistoryReader;
use crate::domain::UserId;

/// Exports history entries for offline audit.
pub struct Exporter<'a> {
    reader: &'a HistoryReader,
}

impl<'a> Exporter<'a> {
    pub fn new(reader: &'a HistoryReader) -> Self {
        Self { reader }
    }

    /// Export history entries to CSV, newest first. Scoped to one user when
    /// `user_id` is given, otherwise across all users. Returns the number
    /// of exported rows.
    pub async fn export_history_csv<W: Write>(
        &self,
        user_id: Option<UserId>,
        writer: W,
    ) -> Result<usize> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "user_id",
            "delta_cents",
            "balance_after",
            "timestamp",
            "reference",
        ])?;

        let mut count = 0;
        let mut page_token: Option<String> = None;
        loop {
            let page = match user_id {
                Some(uid) => {
                    self.reader
                        .list_history(uid, page_token.as_deref(), None)
                        .await?
                }
                None => {
                    self.reader
                        .list_all_history(page_token.as_deref(), None)
                        .await?
                }
            };

            for entry in &page.entries {
                csv_writer.write_record([
                    entry.id.to_string(),
                    entry.user_id.to_string(),
                    entry.delta_cents.to_string(),
                    entry.balance_after.to_string(),
                    entry.timestamp.to_rfc3339(),
                    entry.reference.clone().unwrap_or_default(),
                ])?;
                count += 1;
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        csv_writer.flush()?;
        Ok(count)
    }
}

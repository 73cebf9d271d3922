// Report endpoints

use chrono::SecondsFormat;
use tracing::debug;

use crate::auth::SessionCookie;
use crate::client::TrackClient;
use crate::error::Error;
use crate::models::{EventQuery, EventRecord};

impl TrackClient {
    /// Events for the given devices in a time window.
    ///
    /// `GET /api/reports/events?deviceId=1&deviceId=2&from=..&to=..&type=a,b`
    ///
    /// Returns an empty list without a request when no devices are given.
    pub async fn list_events(
        &self,
        session: &SessionCookie,
        query: &EventQuery,
    ) -> Result<Vec<EventRecord>, Error> {
        if query.device_ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.api_url("reports/events")?;
        debug!(devices = query.device_ids.len(), "listing events");
        self.get(session, url, &event_params(query)).await
    }
}

fn event_params(query: &EventQuery) -> Vec<(&'static str, String)> {
    let mut params: Vec<(&'static str, String)> = query
        .device_ids
        .iter()
        .map(|id| ("deviceId", id.to_string()))
        .collect();

    params.push(("to", query.to.to_rfc3339_opts(SecondsFormat::Secs, true)));

    if let Some(from) = query.from {
        params.push(("from", from.to_rfc3339_opts(SecondsFormat::Secs, true)));
    }

    let types: Vec<&str> = query
        .types
        .iter()
        .map(String::as_str)
        .filter(|t| !t.is_empty())
        .collect();
    if !types.is_empty() {
        params.push(("type", types.join(",")));
    }

    params
}

// Resource endpoints
//
// Read-only listings the fetch cycle needs: devices, latest positions,
// geofences, and server info.

use tracing::debug;

use crate::auth::SessionCookie;
use crate::client::TrackClient;
use crate::error::Error;
use crate::models::{DeviceRecord, GeofenceRecord, PositionRecord, ServerInfo};

impl TrackClient {
    /// List all devices visible to the account.
    ///
    /// `GET /api/devices`
    pub async fn list_devices(&self, session: &SessionCookie) -> Result<Vec<DeviceRecord>, Error> {
        let url = self.api_url("devices")?;
        debug!("listing devices");
        self.get(session, url, &[]).await
    }

    /// Latest position of every device.
    ///
    /// `GET /api/positions`
    pub async fn list_positions(
        &self,
        session: &SessionCookie,
    ) -> Result<Vec<PositionRecord>, Error> {
        let url = self.api_url("positions")?;
        debug!("listing positions");
        self.get(session, url, &[]).await
    }

    /// `GET /api/geofences`
    pub async fn list_geofences(
        &self,
        session: &SessionCookie,
    ) -> Result<Vec<GeofenceRecord>, Error> {
        let url = self.api_url("geofences")?;
        debug!("listing geofences");
        self.get(session, url, &[]).await
    }

    /// `GET /api/server`
    pub async fn server_info(&self, session: &SessionCookie) -> Result<ServerInfo, Error> {
        let url = self.api_url("server")?;
        self.get(session, url, &[]).await
    }
}

//! ESP-IDF HTTP client adapter.
//!
//! Implements [`HttpPort`] over `EspHttpConnection`.  HTTPS uses the
//! built-in certificate bundle; the configured timeout bounds every read,
//! so a stalled server surfaces as an error instead of hanging the agent.

use core::time::Duration;

use esp_idf_svc::http::Method;
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use log::{debug, warn};

use crate::app::ports::{BodyReader, HttpError, HttpPort, HttpResponse};

pub struct EspHttp {
    timeout: Duration,
}

impl EspHttp {
    pub fn new(read_timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(read_timeout_ms),
        }
    }
}

impl HttpPort for EspHttp {
    type Body = EspHttpBody;

    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse<EspHttpBody>, HttpError> {
        let mut conn = EspHttpConnection::new(&Configuration {
            timeout: Some(self.timeout),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        })
        .map_err(|e| HttpError::Connect(format!("{}", e)))?;

        conn.initiate_request(Method::Get, url, headers)
            .map_err(|e| HttpError::Connect(format!("{}", e)))?;
        conn.initiate_response().map_err(|e| {
            warn!("HTTP: no response from {}: {}", url, e);
            HttpError::Io(format!("{}", e))
        })?;

        let status = conn.status();
        let content_length = conn
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok());
        debug!("HTTP: GET {} -> {} ({:?} bytes)", url, status, content_length);

        Ok(HttpResponse {
            status,
            content_length,
            body: EspHttpBody { conn },
        })
    }
}

pub struct EspHttpBody {
    conn: EspHttpConnection,
}

impl BodyReader for EspHttpBody {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, HttpError> {
        self.conn
            .read(buf)
            .map_err(|e| HttpError::Io(format!("read failed: {}", e)))
    }
}

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use tollgate_core::{AuthRecord, SdkError, Version};
use tollgate_crypto::Params;

use crate::client::Client;
use crate::logging::LogSeverity;

fn params(pairs: &[(&str, &str)]) -> Params {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect()
}

fn malformed(what: &str) -> SdkError {
    SdkError::Handler(format!("unexpected {what} payload"))
}

impl Client {
    /// Server-assigned id for this machine, registered on first use.
    pub fn device_id(&self) -> Result<String, SdkError> {
        let session = &self.inner.session;
        if let Some(device_id) = session.device_id() {
            return Ok(device_id);
        }
        let fingerprint = self.inner.fingerprint.fingerprint().map_err(|err| {
            warn!(event = "device_fingerprint_failed", error = %err);
            SdkError::Handler(format!("device fingerprint unavailable: {err}"))
        })?;
        let device_id = self.inner.pipeline.send_request_with(
            "POST",
            "/device-id",
            &Params::new(),
            &params(&[("fingerprint", fingerprint.as_str())]),
            |data| {
                data.as_str()
                    .or_else(|| data.get("device_id").and_then(Value::as_str))
                    .map(str::to_string)
                    .ok_or_else(|| malformed("device id"))
            },
        )?;
        session.set_device_id(&device_id);
        Ok(device_id)
    }

    pub fn auth_records(&self) -> Result<Vec<AuthRecord>, SdkError> {
        self.inner.pipeline.send_request_with(
            "GET",
            "/auth",
            &Params::new(),
            &Params::new(),
            |data| {
                let items = data
                    .as_array()
                    .or_else(|| data.get("records").and_then(Value::as_array))
                    .ok_or_else(|| malformed("auth records"))?;
                items
                    .iter()
                    .map(|item| {
                        serde_json::from_value(item.clone()).map_err(|_| malformed("auth record"))
                    })
                    .collect()
            },
        )
    }

    pub fn lowest_version(&self) -> Result<Version, SdkError> {
        self.inner.pipeline.send_request_with(
            "GET",
            "/lowest-version",
            &Params::new(),
            &Params::new(),
            |data| Version::from_value(data).ok_or_else(|| malformed("version")),
        )
    }

    /// Static text resource by name. The whole catalog is fetched once and
    /// cached until the agent code changes.
    pub fn material(&self, name: &str) -> Result<Option<String>, SdkError> {
        let session = &self.inner.session;
        if session.has_materials() {
            return Ok(session.material(name));
        }
        let materials = self.inner.pipeline.send_request_with(
            "GET",
            "/materials",
            &Params::new(),
            &Params::new(),
            |data| {
                let object = data.as_object().ok_or_else(|| malformed("materials"))?;
                Ok(object
                    .iter()
                    .filter_map(|(key, value)| {
                        value.as_str().map(|text| (key.clone(), text.to_string()))
                    })
                    .collect::<HashMap<_, _>>())
            },
        )?;
        debug!(event = "materials_cached", count = materials.len());
        let found = materials.get(name).cloned();
        session.replace_materials(materials);
        Ok(found)
    }

    pub fn shopee_hosts(&self) -> Result<Value, SdkError> {
        let session = &self.inner.session;
        if let Some(hosts) = session.shopee_hosts() {
            return Ok(hosts);
        }
        let hosts = self
            .inner
            .pipeline
            .send_request("GET", "/shopee-hosts", &Params::new(), &Params::new())?;
        session.set_shopee_hosts(hosts.clone());
        Ok(hosts)
    }

    pub fn web_url(&self, page: &str) -> Result<String, SdkError> {
        if page.is_empty() {
            return Err(SdkError::InvalidParameters("page is required"));
        }
        self.inner.pipeline.send_request_with(
            "GET",
            "/web-url",
            &params(&[("page", page)]),
            &Params::new(),
            |data| {
                data.as_str()
                    .or_else(|| data.get("url").and_then(Value::as_str))
                    .map(str::to_string)
                    .ok_or_else(|| malformed("web url"))
            },
        )
    }

    /// Sends one line to the service's log collector.
    pub fn report_log(&self, message: &str, severity: LogSeverity) -> Result<(), SdkError> {
        self.inner
            .pipeline
            .send_request(
                "POST",
                "/log",
                &Params::new(),
                &params(&[("level", severity.as_str()), ("message", message)]),
            )
            .map(|_| ())
    }
}

// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! Thin client for the subset of the Consul HTTP API the HA agent needs:
//! sessions, consistent KV reads, session-bound advisory locks and
//! blocking-query key watches.
//!
//! The coordinator itself is an external collaborator; everything here is
//! contracted purely at its HTTP interface.

mod lock;
mod watch;

pub use lock::{Lock, LockOptions};

use lcm_request_retry::RetryAction;
use std::fmt::Debug;
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    #[error("session [{0}] is no longer valid")]
    SessionExpired(String),
    #[error("the lock is already held by this handle")]
    LockHeld,
    #[error("unexpected response from the coordinator: {0}")]
    UnexpectedResponse(String),
}

/// A KV pair as returned by the coordinator, with the value decoded back
/// to raw bytes. `session` is the id of the session currently holding the
/// pair's lock, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    pub session: Option<String>,
    pub modify_index: u64,
}

#[derive(Debug, serde::Deserialize)]
struct RawKvPair {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Value")]
    value: Option<String>,
    #[serde(rename = "Session")]
    session: Option<String>,
    #[serde(rename = "ModifyIndex")]
    modify_index: u64,
}

impl RawKvPair {
    fn decode(self) -> Result<KvPair, Error> {
        let value = match self.value {
            Some(x) => base64::decode(&x)?,
            None => vec![],
        };

        Ok(KvPair {
            key: self.key,
            value,
            session: self.session.filter(|x| !x.is_empty()),
            modify_index: self.modify_index,
        })
    }
}

#[derive(serde::Serialize)]
struct SessionRequest<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    #[serde(rename = "LockDelay")]
    lock_delay: &'a str,
    #[serde(rename = "Behavior")]
    behavior: &'a str,
}

#[derive(serde::Deserialize)]
struct SessionResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Clone)]
pub struct ConsulClient {
    client: reqwest::Client,
    base_url: Url,
}

impl ConsulClient {
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn kv_url(&self, key: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(&format!("v1/kv/{}", key))?)
    }

    /// Read a single KV pair. `Ok(None)` when the key does not exist.
    pub async fn kv_get(&self, key: &str, consistent: bool) -> Result<Option<KvPair>, Error> {
        let mut req = self.client.get(self.kv_url(key)?);

        if consistent {
            req = req.query(&[("consistent", "")]);
        }

        let resp = req.send().await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let pairs: Vec<RawKvPair> = resp.error_for_status()?.json().await?;

        pairs.into_iter().next().map(RawKvPair::decode).transpose()
    }

    /// Blocking-query read of a single KV pair. Completes once the key's
    /// state is newer than `index` or after `wait`, whichever comes first,
    /// and returns the pair (if any) together with the new index to pass
    /// into the next call.
    pub(crate) async fn kv_get_blocking(
        &self,
        key: &str,
        index: u64,
        wait: Duration,
    ) -> Result<(Option<KvPair>, u64), Error> {
        let resp = self
            .client
            .get(self.kv_url(key)?)
            .query(&[
                ("index", index.to_string()),
                ("wait", format!("{}s", wait.as_secs())),
            ])
            .send()
            .await?;

        let new_index = consul_index(&resp).unwrap_or(index);

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok((None, new_index));
        }

        let pairs: Vec<RawKvPair> = resp.error_for_status()?.json().await?;
        let pair = pairs.into_iter().next().map(RawKvPair::decode).transpose()?;

        Ok((pair, new_index))
    }

    /// Write `value` to `key` bound to `session`. Returns whether the
    /// coordinator granted the acquisition.
    pub async fn kv_acquire(&self, key: &str, session: &str, value: &str) -> Result<bool, Error> {
        let resp = self
            .client
            .put(self.kv_url(key)?)
            .query(&[("acquire", session)])
            .body(value.to_string())
            .send()
            .await?
            .error_for_status()?;

        parse_bool_body(resp).await
    }

    /// Release the session binding on `key`, leaving the pair in place.
    pub async fn kv_release(&self, key: &str, session: &str) -> Result<bool, Error> {
        let resp = self
            .client
            .put(self.kv_url(key)?)
            .query(&[("release", session)])
            .send()
            .await?
            .error_for_status()?;

        parse_bool_body(resp).await
    }

    pub async fn session_create(&self, name: &str, ttl: Duration) -> Result<String, Error> {
        let body = SessionRequest {
            name,
            ttl: format!("{}s", ttl.as_secs()),
            lock_delay: "15s",
            behavior: "release",
        };

        let resp: SessionResponse = self
            .client
            .put(self.base_url.join("v1/session/create")?)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.id)
    }

    pub async fn session_renew(&self, id: &str) -> Result<(), Error> {
        let resp = self
            .client
            .put(self.base_url.join(&format!("v1/session/renew/{}", id))?)
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::SessionExpired(id.to_string()));
        }

        resp.error_for_status()?;

        Ok(())
    }

    pub async fn session_destroy(&self, id: &str) -> Result<(), Error> {
        self.client
            .put(self.base_url.join(&format!("v1/session/destroy/{}", id))?)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

fn consul_index(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get("X-Consul-Index")?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

async fn parse_bool_body(resp: reqwest::Response) -> Result<bool, Error> {
    let text = resp.text().await?;

    match text.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        x => Err(Error::UnexpectedResponse(x.to_string())),
    }
}

/// Retry policy for transient transport errors against the coordinator.
/// Session expiry is not transient; it must surface so the caller can
/// re-resolve leadership.
pub(crate) fn transient_policy<E: Debug>() -> impl lcm_request_retry::RetryPolicy<E> {
    |k: u32, e: E| match k {
        k if k < 3 => {
            tracing::debug!("Transient coordinator error, retrying: {:?}", e);

            RetryAction::WaitFor(Duration::from_secs(1))
        }
        _ => RetryAction::ReturnError(e),
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::sync::{Mutex, MutexGuard};

    static SERIAL: Mutex<()> = Mutex::new(());

    /// Mockito's server is shared per-process; tests that stub overlapping
    /// endpoints must not run concurrently.
    pub(crate) fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::mock;

    fn create_client() -> Result<ConsulClient, Error> {
        let url = Url::parse(&mockito::server_url())?;

        Ok(ConsulClient::new(reqwest::Client::new(), url))
    }

    #[tokio::test]
    async fn test_kv_get_missing() -> Result<(), Error> {
        let _serial = crate::test_util::serial();

        let m = mock("GET", "/v1/kv/lcm/services/fs0-OST0000/lock")
            .with_status(404)
            .create();

        let client = create_client()?;

        let r = client.kv_get("lcm/services/fs0-OST0000/lock", false).await?;

        assert_eq!(r, None);

        m.assert();

        Ok(())
    }

    #[tokio::test]
    async fn test_kv_get_held_pair() -> Result<(), Error> {
        let _serial = crate::test_util::serial();

        let m = mock("GET", "/v1/kv/lcm/services/fs0-OST0001/lock?consistent=")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"LockIndex":1,"Key":"lcm/services/fs0-OST0001/lock",
                    "Flags":0,"Value":"dGVzdC11dWlk",
                    "Session":"4ca8e74b","CreateIndex":10,"ModifyIndex":12}]"#,
            )
            .create();

        let client = create_client()?;

        let r = client
            .kv_get("lcm/services/fs0-OST0001/lock", true)
            .await?
            .expect("pair should exist");

        assert_eq!(r.value, b"test-uuid");
        assert_eq!(r.session.as_deref(), Some("4ca8e74b"));
        assert_eq!(r.modify_index, 12);

        m.assert();

        Ok(())
    }

    #[tokio::test]
    async fn test_kv_get_released_pair() -> Result<(), Error> {
        let _serial = crate::test_util::serial();

        let m = mock("GET", "/v1/kv/lcm/hosts/server1/lock")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"LockIndex":1,"Key":"lcm/hosts/server1/lock",
                    "Flags":0,"Value":null,"CreateIndex":3,"ModifyIndex":9}]"#,
            )
            .create();

        let client = create_client()?;

        let r = client
            .kv_get("lcm/hosts/server1/lock", false)
            .await?
            .expect("pair should exist");

        assert_eq!(r.value, Vec::<u8>::new());
        assert_eq!(r.session, None);

        m.assert();

        Ok(())
    }

    #[tokio::test]
    async fn test_kv_acquire() -> Result<(), Error> {
        let _serial = crate::test_util::serial();

        let m = mock("PUT", "/v1/kv/lcm/hosts/server2/lock?acquire=sess-1")
            .with_status(200)
            .with_body("true")
            .create();

        let client = create_client()?;

        let r = client
            .kv_acquire("lcm/hosts/server2/lock", "sess-1", "agent-uuid")
            .await?;

        assert!(r);

        m.assert();

        Ok(())
    }

    #[tokio::test]
    async fn test_session_create() -> Result<(), Error> {
        let _serial = crate::test_util::serial();

        let m = mock("PUT", "/v1/session/create")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ID":"adf4238a-882b-9ddc-4a9d-5b6758e4159e"}"#)
            .create();

        let client = create_client()?;

        let r = client
            .session_create("lcm service lock", Duration::from_secs(10))
            .await?;

        assert_eq!(r, "adf4238a-882b-9ddc-4a9d-5b6758e4159e");

        m.assert();

        Ok(())
    }

    #[tokio::test]
    async fn test_session_renew_expired() -> Result<(), Error> {
        let _serial = crate::test_util::serial();

        let m = mock("PUT", "/v1/session/renew/dead-session")
            .with_status(404)
            .create();

        let client = create_client()?;

        let r = client.session_renew("dead-session").await;

        match r {
            Err(Error::SessionExpired(id)) => assert_eq!(id, "dead-session"),
            x => panic!("expected session expiry, got {:?}", x),
        }

        m.assert();

        Ok(())
    }
}

/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Builds the relay's REST endpoint URLs (§6.1) from a backend's configured server base URL.

/// The set of endpoint URLs derived from one backend's `server_url`.
pub struct EndpointUrls {
    base: String,
}

impl EndpointUrls {
    pub fn new(mut server_url: String) -> Self {
        if server_url.ends_with('/') {
            server_url.pop();
        }
        Self { base: server_url }
    }

    pub fn push(&self) -> String {
        format!("{}/sync/push", self.base)
    }

    pub fn pull(&self) -> String {
        format!("{}/sync/pull", self.base)
    }

    pub fn pull_columns(&self) -> String {
        format!("{}/sync/pull-columns", self.base)
    }

    pub fn vaults(&self) -> String {
        format!("{}/sync/vaults", self.base)
    }

    pub fn realtime(&self) -> String {
        format!("{}/sync/realtime", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_on_the_base_url_is_not_duplicated() {
        let urls = EndpointUrls::new("https://relay.example/".to_string());
        assert_eq!(urls.push(), "https://relay.example/sync/push");
    }

    #[test]
    fn each_endpoint_gets_its_documented_path() {
        let urls = EndpointUrls::new("https://relay.example".to_string());
        assert_eq!(urls.pull(), "https://relay.example/sync/pull");
        assert_eq!(urls.pull_columns(), "https://relay.example/sync/pull-columns");
        assert_eq!(urls.vaults(), "https://relay.example/sync/vaults");
        assert_eq!(urls.realtime(), "https://relay.example/sync/realtime");
    }
}

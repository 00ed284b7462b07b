// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use std::env;
use url::Url;

pub fn get_var_else(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Base URL of the local coordinator agent.
pub fn consul_url() -> Url {
    let x = get_var_else("LCM_CONSUL_URL", "http://127.0.0.1:8500");

    Url::parse(&x).expect("Could not parse the coordinator url")
}

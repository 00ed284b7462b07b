// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

use futures::future::join_all;
use lcm_agent::{agent_error::Result, agents, config, env, util, version_check};
use lcm_consul::ConsulClient;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    lcm_tracing::init();

    tracing::info!("Starting the HA agent");

    let hostname = util::local_hostname().await?;
    let topology = config::load_topology().await?;

    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()?;
    let consul = ConsulClient::new(client, env::consul_url());

    let service_agents = agents::create_service_agents(&consul, &topology, &hostname);
    let host_agents = agents::create_host_agents(&consul, &topology, &hostname)?;

    let cancel = CancellationToken::new();
    let mut tasks = vec![];

    tasks.push(tokio::spawn(version_check::version_check(
        cancel.child_token(),
    )));

    for agent in service_agents {
        tracing::info!("Starting the agent for Lustre service [{}]", agent.label());

        tasks.push(tokio::spawn(agent.supervise(cancel.child_token())));
    }

    for agent in host_agents {
        tracing::info!("Starting the agent for host [{}]", agent.label());

        tasks.push(tokio::spawn(agent.supervise(cancel.child_token())));
    }

    util::wait_for_termination().await;

    tracing::warn!("Terminating on signal...");

    cancel.cancel();

    join_all(tasks).await;

    Ok(())
}

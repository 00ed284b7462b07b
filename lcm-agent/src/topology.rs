// Copyright (c) 2022 DDN. All rights reserved.
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file.

//! The local view over the cluster topology: which service instances this
//! node hosts, and which peer hosts it is responsible for watching.

use crate::agent_error::{LcmAgentError, Result};
use crate::config::{ServiceInstance, SshHost, Topology};

/// A service instance hosted on this node, together with its canonical
/// service name.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalService {
    pub service_name: String,
    pub instance: ServiceInstance,
}

/// Every instance across filesystems and MGS definitions whose hostname
/// matches `hostname`.
pub fn local_services(topology: &Topology, hostname: &str) -> Vec<LocalService> {
    let mut xs = vec![];

    for fs in &topology.filesystems {
        for target in fs.mdts.iter().chain(fs.osts.iter()) {
            for instance in &target.instances {
                if instance.hostname == hostname {
                    tracing::debug!(
                        "Adding local instance of [{}] on device {}",
                        target.service_name,
                        instance.device
                    );

                    xs.push(LocalService {
                        service_name: target.service_name.clone(),
                        instance: instance.clone(),
                    });
                }
            }
        }
    }

    for mgs in &topology.mgs_list {
        for instance in &mgs.instances {
            if instance.hostname == hostname {
                tracing::debug!(
                    "Adding local instance of [{}] on device {}",
                    mgs.service_name,
                    instance.device
                );

                xs.push(LocalService {
                    service_name: mgs.service_name.clone(),
                    instance: instance.clone(),
                });
            }
        }
    }

    xs
}

/// The peer hosts this node watches: up to `fanout` successors of the
/// local host on the sorted ring of participating hosts. Standalone hosts
/// participate only on themselves. Fails when the local host is not part
/// of the configuration at all.
pub fn neighbour_hosts(
    topology: &Topology,
    hostname: &str,
    fanout: usize,
) -> Result<Vec<SshHost>> {
    let mut candidates: Vec<SshHost> = topology
        .hosts
        .iter()
        .filter(|x| !x.standalone || x.hostname == hostname)
        .cloned()
        .collect();

    candidates.sort_by(|a, b| a.hostname.cmp(&b.hostname));

    let position = candidates
        .iter()
        .position(|x| x.hostname == hostname)
        .ok_or_else(|| LcmAgentError::LocalHostMissing(hostname.to_string()))?;

    let mut picked: Vec<SshHost> = vec![];

    for i in 1..candidates.len() {
        if picked.len() >= fanout {
            break;
        }

        picked.push(candidates[(position + i) % candidates.len()].clone());
    }

    // The watch list is handed out sorted, not in ring order.
    picked.sort_by(|a, b| a.hostname.cmp(&b.hostname));

    Ok(picked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::simple_topology;
    use crate::WATCH_FANOUT;
    use proptest::prelude::*;

    fn host_topology(names: &[&str]) -> Topology {
        Topology {
            hosts: names
                .iter()
                .map(|x| SshHost {
                    hostname: x.to_string(),
                    standalone: false,
                })
                .collect(),
            ..Default::default()
        }
    }

    fn names(xs: &[SshHost]) -> Vec<&str> {
        xs.iter().map(|x| x.hostname.as_str()).collect()
    }

    #[test]
    fn test_local_services() {
        let topology = simple_topology();

        let alpha = local_services(&topology, "alpha");
        let beta = local_services(&topology, "beta");
        let gamma = local_services(&topology, "gamma");

        assert_eq!(
            alpha.iter().map(|x| x.service_name.as_str()).collect::<Vec<_>>(),
            vec!["lustre0-MDT0000", "lustre0-OST000a"]
        );
        assert_eq!(
            beta.iter().map(|x| x.service_name.as_str()).collect::<Vec<_>>(),
            vec!["lustre0-OST000a", "mgs0"]
        );
        assert!(gamma.is_empty());
    }

    #[test]
    fn test_ring_successors() {
        let topology = host_topology(&["h1", "h2", "h3", "h4", "h5"]);

        let r = neighbour_hosts(&topology, "h3", 2).unwrap();

        assert_eq!(names(&r), vec!["h4", "h5"]);
    }

    #[test]
    fn test_ring_wrap_around() {
        let topology = host_topology(&["h1", "h2", "h3", "h4", "h5"]);

        let r = neighbour_hosts(&topology, "h5", 2).unwrap();

        assert_eq!(names(&r), vec!["h1", "h2"]);
    }

    #[test]
    fn test_ring_wrap_around_is_resorted() {
        let topology = host_topology(&["h1", "h2", "h3", "h4", "h5"]);

        let r = neighbour_hosts(&topology, "h4", 3).unwrap();

        assert_eq!(names(&r), vec!["h1", "h2", "h5"]);
    }

    #[test]
    fn test_ring_skips_standalone_peers() {
        let mut topology = host_topology(&["h1", "h2", "h3", "h4"]);

        topology.hosts[1].standalone = true;

        let r = neighbour_hosts(&topology, "h1", 2).unwrap();

        assert_eq!(names(&r), vec!["h3", "h4"]);
    }

    #[test]
    fn test_standalone_local_host_participates() {
        let mut topology = host_topology(&["h1", "h2"]);

        topology.hosts[0].standalone = true;

        let r = neighbour_hosts(&topology, "h1", 2).unwrap();

        assert_eq!(names(&r), vec!["h2"]);
    }

    #[test]
    fn test_missing_local_host_is_fatal() {
        let topology = host_topology(&["h1", "h2"]);

        match neighbour_hosts(&topology, "h9", 2) {
            Err(LcmAgentError::LocalHostMissing(x)) => assert_eq!(x, "h9"),
            x => panic!("expected a fatal error, got {:?}", x),
        }
    }

    #[test]
    fn test_single_host_cluster() {
        let topology = host_topology(&["h1"]);

        let r = neighbour_hosts(&topology, "h1", 2).unwrap();

        assert!(r.is_empty());
    }

    proptest! {
        #[test]
        fn test_ring_properties(
            hostnames in prop::collection::hash_set("[a-z]{1,8}", 2..10),
            seed in any::<u64>(),
        ) {
            use rand::seq::SliceRandom;
            use rand::SeedableRng;

            let mut hosts: Vec<String> = hostnames.into_iter().collect();
            hosts.sort();

            let local = hosts[(seed as usize) % hosts.len()].clone();

            let mut shuffled = hosts.clone();
            shuffled.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed));

            let topology = |xs: &[String]| Topology {
                hosts: xs
                    .iter()
                    .map(|x| SshHost {
                        hostname: x.clone(),
                        standalone: false,
                    })
                    .collect(),
                ..Default::default()
            };

            let from_sorted =
                neighbour_hosts(&topology(&hosts), &local, WATCH_FANOUT).unwrap();
            let from_shuffled =
                neighbour_hosts(&topology(&shuffled), &local, WATCH_FANOUT).unwrap();

            prop_assert_eq!(&from_sorted, &from_shuffled);
            prop_assert_eq!(
                from_sorted.len(),
                WATCH_FANOUT.min(hosts.len() - 1)
            );
            prop_assert!(from_sorted.iter().all(|x| x.hostname != local));
        }
    }
}

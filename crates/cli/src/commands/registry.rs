//! `registry` command implementation.
//!
//! Publishes the configured robots' tracks into a fresh registry, exactly as
//! the simulated adapters would, and prints what discovery clients receive.

use anyhow::{Context, Result};
use contracts::{
    AvailableRobotCapacityUpdate, InstanceKey, PlatformBlueprint, TrackSpec,
};
use stream_registry::StreamRegistry;
use tracing::info;

use super::load_blueprint;
use crate::cli::RegistryArgs;

/// Execute the `registry` command
pub fn run_registry(args: &RegistryArgs) -> Result<()> {
    info!(config = %args.config.display(), "Building discovery snapshot");

    let blueprint = load_blueprint(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let registry = advertise(&blueprint);
    let mut snapshot = registry.snapshot();
    if let Some(robot) = &args.robot {
        snapshot.robots.retain(|r| r.robot_id == robot.as_str());
        if snapshot.robots.is_empty() {
            anyhow::bail!("Robot '{}' publishes no tracks in this configuration", robot);
        }
    }

    if args.json {
        let json = serde_json::to_string_pretty(&snapshot)
            .context("Failed to serialize discovery snapshot")?;
        println!("{}", json);
    } else {
        print_snapshot(&snapshot, blueprint.registry.max_connections_per_instance);
    }
    Ok(())
}

/// Registry holding every configured track. Robots without tracks never
/// appear, as in a live run.
fn advertise(blueprint: &PlatformBlueprint) -> StreamRegistry {
    let registry = StreamRegistry::with_config(blueprint.registry.clone());
    for robot in &blueprint.robots {
        let key = InstanceKey::new(robot.robot_id.as_str(), robot.instance);
        let producer = ingestion::simulated_producer_id(&key);
        for (mid, track) in robot.tracks.iter().enumerate() {
            registry.publish(
                key.robot_id.clone(),
                key.instance,
                TrackSpec::new(track.kind, track.label.as_str(), mid.to_string(), producer.as_str()),
            );
        }
    }
    registry
}

fn print_snapshot(snapshot: &AvailableRobotCapacityUpdate, max_connections: u32) {
    println!("\nDiscovery ({} robots)", snapshot.robots.len());
    for (i, robot) in snapshot.robots.iter().enumerate() {
        let last_robot = i + 1 == snapshot.robots.len();
        let (prefix, indent) = if last_robot {
            ("└─", "   ")
        } else {
            ("├─", "│  ")
        };
        println!("   {} {}", prefix, robot.robot_id);

        for (j, (instance, view)) in robot.instances.iter().enumerate() {
            let last_instance = j + 1 == robot.instances.len();
            let branch = if last_instance { "└─" } else { "├─" };
            println!(
                "   {}{} #{} ({}/{} connections)",
                indent, branch, instance, view.connections, max_connections
            );
            let inner = if last_instance { "   " } else { "│  " };
            for (kind, tracks) in &view.tracks {
                for track in tracks {
                    println!(
                        "   {}{}  {} {} (mid {}, producer {})",
                        indent, inner, kind, track.label, track.mid, track.stream_id
                    );
                }
            }
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::TrackKind;

    fn blueprint() -> PlatformBlueprint {
        config_loader::ConfigLoader::load_from_str(
            r#"
[sync]
tolerance_ms = 50.0

[recording]
grace_period_s = 5.0

[[robots]]
robot_id = "robot-7"
[[robots.tracks]]
kind = "RGB"
label = "wrist"
frequency_hz = 30.0
[[robots.tracks]]
kind = "SUCTION_GRIPPER"
label = "cup"
frequency_hz = 10.0

[[robots]]
robot_id = "robot-8"
instance = 2
"#,
            config_loader::ConfigFormat::Toml,
        )
        .unwrap()
    }

    #[test]
    fn test_advertise_matches_live_adapters() {
        let registry = advertise(&blueprint());
        let snapshot = registry.snapshot();

        // robot-8 has no tracks and is never discoverable
        assert_eq!(snapshot.robots.len(), 1);
        let instance = snapshot.instance("robot-7", 0).unwrap();
        let rgb = &instance.tracks[&TrackKind::Rgb][0];
        assert_eq!(rgb.label, "wrist");
        assert_eq!(rgb.mid, "0");
        assert_eq!(rgb.stream_id, "sim-robot-7#0");
        assert_eq!(instance.tracks[&TrackKind::SuctionGripper][0].mid, "1");
        assert_eq!(
            registry.producer_of(&InstanceKey::new("robot-7", 0)).as_deref(),
            Some("sim-robot-7#0")
        );
    }

    #[test]
    fn test_unknown_robot_filter_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.toml");
        std::fs::write(
            &path,
            "[sync]\ntolerance_ms = 50.0\n[recording]\ngrace_period_s = 5.0\n",
        )
        .unwrap();

        let args = RegistryArgs {
            config: path,
            robot: Some("ghost".into()),
            json: true,
        };
        assert!(run_registry(&args).is_err());
    }
}

//! Periodic station movement and link recomputation

use std::time::Duration;

use log::trace;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use wmedium_core::StationId;

use crate::channel::{ChannelTables, PathLoss};

/// Path loss in dB over `distance` metres.
pub fn path_loss(model: &PathLoss, distance: f64) -> f64 {
    let distance = distance.max(1.0);
    model.reference_loss + 10.0 * model.exponent * distance.log10()
}

/// Advances every station along its direction and, unless the SNR matrix
/// is fixed, recomputes it from the new positions.
pub fn move_stations<R: Rng + ?Sized>(tables: &mut ChannelTables, elapsed: Duration, rng: &mut R) -> usize {
    let dt = elapsed.as_secs_f64();
    let mut moved = 0;
    for node in tables.nodes_mut() {
        if node.direction.x != 0.0 || node.direction.y != 0.0 {
            node.position.x += node.direction.x * dt;
            node.position.y += node.direction.y * dt;
            moved += 1;
        }
    }
    if !tables.fixed_snr {
        recompute_snr(tables, rng);
    }
    trace!("Mobility tick moved {} stations", moved);
    moved
}

pub fn recompute_snr<R: Rng + ?Sized>(tables: &mut ChannelTables, rng: &mut R) {
    let shadowing = match tables.path_loss.shadowing_sigma {
        sigma if sigma > 0.0 => Normal::new(0.0, sigma).ok(),
        _ => None,
    };
    let n = tables.len();
    for a in 0..n {
        for b in 0..n {
            if a == b {
                continue;
            }
            let (src, dst) = (&tables.nodes()[a], &tables.nodes()[b]);
            let mut loss = path_loss(&tables.path_loss, src.position.distance(&dst.position));
            if let Some(normal) = &shadowing {
                loss += normal.sample(rng);
            }
            let snr = (f64::from(src.tx_power) - loss - f64::from(tables.noise_level)).round() as i32;
            tables.set_snr(StationId(a), StationId(b), snr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{NodeState, Vec2};

    fn two_nodes() -> ChannelTables {
        let mut tables = ChannelTables::new(0, 15, -91);
        tables.add_station(NodeState::default());
        tables.add_station(NodeState {
            position: Vec2::new(10.0, 0.0),
            direction: Vec2::new(1.0, 0.0),
            ..NodeState::default()
        });
        tables
    }

    #[test]
    fn test_path_loss_reference_and_slope() {
        let model = PathLoss::default();
        assert_eq!(path_loss(&model, 0.2), model.reference_loss);
        let per_decade = path_loss(&model, 100.0) - path_loss(&model, 10.0);
        assert!((per_decade - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_move_updates_position_and_snr() {
        let mut tables = two_nodes();
        let mut rng = rand::rng();

        move_stations(&mut tables, Duration::from_secs(3), &mut rng);
        assert_eq!(tables.nodes()[1].position, Vec2::new(13.0, 0.0));
        let near = tables.snr(StationId(0), StationId(1));

        move_stations(&mut tables, Duration::from_secs(90), &mut rng);
        let far = tables.snr(StationId(0), StationId(1));
        assert!(far < near);
        assert_eq!(tables.snr(StationId(0), StationId(1)), tables.snr(StationId(1), StationId(0)));
    }

    #[test]
    fn test_fixed_snr_survives_movement() {
        let mut tables = two_nodes();
        tables.fixed_snr = true;
        tables.set_snr(StationId(0), StationId(1), 42);

        move_stations(&mut tables, Duration::from_secs(3), &mut rand::rng());
        assert_eq!(tables.snr(StationId(0), StationId(1)), 42);
        assert_eq!(tables.nodes()[1].position.x, 13.0);
    }
}

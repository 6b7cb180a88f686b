use tracing::debug;

use super::client::Client;
use super::station::{distance, BaseStation};

/// Builds, for each client, the list of stations sorted by distance and
/// bounded to the K nearest. The index is the single writer of
/// `Client::closest_stations`; clients only read their cached list.
///
/// A rebuild is guarded by the last-run tick so repeated requests within
/// the same integer tick are no-ops. The t=0 rebuild assigns each client
/// to its nearest covering station; later rebuilds only refresh the lists.
#[derive(Debug)]
pub struct SpatialIndex {
    limit: usize,
    last_run_tick: Option<u64>,
}

impl SpatialIndex {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            last_run_tick: None,
        }
    }

    /// Recompute every client's K-nearest list. Returns false when the
    /// guard suppressed the rebuild.
    pub fn rebuild(
        &mut self,
        clients: &mut [Client],
        stations: &[BaseStation],
        tick: u64,
        assign: bool,
    ) -> bool {
        if self.last_run_tick == Some(tick) {
            return false;
        }
        self.last_run_tick = Some(tick);

        for client in clients.iter_mut() {
            let mut nearest: Vec<_> = stations
                .iter()
                .map(|bs| (distance((client.x, client.y), bs.coverage.center()), bs.pk))
                .collect();
            nearest.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1 .0.cmp(&b.1 .0)));
            nearest.truncate(self.limit);
            client.closest_stations = nearest;

            if assign {
                client.base_station = client
                    .closest_stations
                    .iter()
                    .find(|(d, sid)| *d <= stations[sid.0].coverage.radius())
                    .map(|(_, sid)| *sid);
            }
        }

        debug!(tick, assign, "spatial index rebuilt");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::client::ClientId;
    use crate::engine::slice::Slice;
    use crate::engine::station::{Coverage, StationId};
    use crate::random::Distributor;

    fn station(id: usize, x: f64, y: f64, radius: f64) -> BaseStation {
        let pattern = Distributor::new("p", "randint", &[1.0, 1.0]).unwrap();
        let slice = Slice::new("s", 100.0, 3, 1.0, 10.0, 10.0, pattern);
        BaseStation::new(StationId(id), Coverage::new((x, y), radius), 10.0, vec![slice])
    }

    fn client(x: f64, y: f64) -> Client {
        let mobility = Distributor::new("m", "uniform", &[0.0, 1.0]).unwrap();
        Client::new(ClientId(0), x, y, mobility, 0.0, 0)
    }

    #[test]
    fn lists_are_sorted_and_bounded() {
        let stations = vec![
            station(0, 100.0, 0.0, 10.0),
            station(1, 10.0, 0.0, 10.0),
            station(2, 50.0, 0.0, 10.0),
        ];
        let mut clients = vec![client(0.0, 0.0)];
        let mut index = SpatialIndex::new(2);

        assert!(index.rebuild(&mut clients, &stations, 0, false));

        let list = &clients[0].closest_stations;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].1, StationId(1));
        assert_eq!(list[1].1, StationId(2));
        assert!(list[0].0 < list[1].0);
    }

    #[test]
    fn assigning_rebuild_attaches_covered_clients() {
        let stations = vec![station(0, 0.0, 0.0, 10.0), station(1, 100.0, 0.0, 10.0)];
        let mut clients = vec![client(3.0, 0.0), client(50.0, 0.0)];
        let mut index = SpatialIndex::new(2);

        index.rebuild(&mut clients, &stations, 0, true);

        assert_eq!(clients[0].base_station, Some(StationId(0)));
        // Nearest station does not cover (50, 0): stays unattached.
        assert_eq!(clients[1].base_station, None);
    }

    #[test]
    fn non_assigning_rebuild_keeps_attachments() {
        let stations = vec![station(0, 0.0, 0.0, 10.0)];
        let mut clients = vec![client(500.0, 0.0)];
        clients[0].base_station = Some(StationId(0));
        let mut index = SpatialIndex::new(1);

        index.rebuild(&mut clients, &stations, 3, false);

        // List refreshed, attachment untouched even though out of range.
        assert_eq!(clients[0].base_station, Some(StationId(0)));
        assert_eq!(clients[0].closest_stations.len(), 1);
    }

    #[test]
    fn rebuild_is_guarded_per_tick() {
        let stations = vec![station(0, 0.0, 0.0, 10.0)];
        let mut clients = vec![client(0.0, 0.0)];
        let mut index = SpatialIndex::new(1);

        assert!(index.rebuild(&mut clients, &stations, 5, false));
        assert!(!index.rebuild(&mut clients, &stations, 5, false));
        assert!(index.rebuild(&mut clients, &stations, 6, false));
    }
}

use std::sync::{Arc, Mutex};

use rs_core::{AggregationConfig, TimeSeries};

use crate::{Database, DbError};

/// A [`Database`] shared between threads.
///
/// Every call holds the same lock for its whole duration, so a time series
/// never interleaves with a write.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Runs `f` with exclusive access to the database.
    pub fn with<T>(
        &self,
        f: impl FnOnce(&mut Database) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let mut db = self.inner.lock().map_err(|_| DbError::LockPoisoned)?;
        f(&mut *db)
    }

    pub fn time_series(&self, config: &AggregationConfig) -> Result<TimeSeries, DbError> {
        self.with(|db| db.time_series(config))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use chrono::{TimeZone, Utc};
    use rs_core::{EventStatus, EventTag, TeamId};

    use super::*;
    use crate::{NewEvent, NewTeam};

    #[test]
    fn concurrent_writers_and_readers_see_whole_events() {
        let shared = SharedDatabase::new(Database::open_in_memory().unwrap());
        shared
            .with(|db| {
                db.add_event(&NewEvent {
                    tag: EventTag::new("range").unwrap(),
                    name: "Range".to_string(),
                    frontends: String::new(),
                    exercises: String::new(),
                    available: 3,
                    capacity: 50,
                    status: EventStatus::Running,
                    started_at: Utc.with_ymd_and_hms(2020, 5, 19, 8, 0, 0).unwrap(),
                    expected_finish: Utc.with_ymd_and_hms(2020, 5, 21, 17, 0, 0).unwrap(),
                    created_by: String::new(),
                    only_vpn: false,
                })
            })
            .unwrap();

        let writers: Vec<_> = (0..4)
            .map(|worker| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for n in 0..5 {
                        shared
                            .with(|db| {
                                db.add_team(&NewTeam {
                                    id: Some(TeamId::new(format!("w{worker}-{n}")).unwrap()),
                                    event_tag: EventTag::new("range").unwrap(),
                                    email: String::new(),
                                    name: String::new(),
                                    password: String::new(),
                                })
                            })
                            .unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let shared = shared.clone();
            thread::spawn(move || {
                for _ in 0..10 {
                    let series = shared.time_series(&AggregationConfig::default()).unwrap();
                    let totals: Vec<u32> = series.iter().map(|(_, total)| total).collect();
                    assert_eq!(totals.len(), 3);
                    // All days of the event move together.
                    assert!(totals.windows(2).all(|pair| pair[0] == pair[1]));
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        reader.join().unwrap();

        let series = shared.time_series(&AggregationConfig::default()).unwrap();
        assert!(series.iter().all(|(_, total)| total == 3 + 20));
    }
}

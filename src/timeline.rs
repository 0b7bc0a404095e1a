//! Stopwatch → timeline flattening

use crate::snapshot::{Timeline, TimelineEntry, TimelinePeriod};
use crate::stopwatch::Stopwatch;

/// Flatten every timer of every identified section into one timeline.
///
/// Entries are keyed by timer name, so a timer name reused in a later section
/// replaces the earlier entry. `time_min` starts at `f64::MAX` and `time_max`
/// at zero, which is what an empty stopwatch reports.
pub fn build_timeline(stopwatch: &Stopwatch) -> Timeline {
    let mut timeline = Timeline::default();

    for section in stopwatch.sections() {
        let section_id = section.id().unwrap_or_default();

        for (name, event) in section.events() {
            let origin = event.origin();
            let duration = event.duration();

            let periods = if event.periods().len() > 1 {
                event
                    .periods()
                    .iter()
                    .map(|period| TimelinePeriod {
                        memory: period.memory(),
                        start: period.start_time(),
                    })
                    .collect()
            } else {
                Vec::new()
            };

            timeline.timeline.insert(
                name.to_string(),
                TimelineEntry {
                    section: section_id.to_string(),
                    category: event.category().to_string(),
                    memory: event.memory(),
                    origin,
                    start: event.start_time(),
                    end: event.end_time(),
                    duration,
                    periods,
                },
            );

            if origin < timeline.time_min {
                timeline.time_min = origin;
            }
            if origin + duration > timeline.time_max {
                timeline.time_max = origin + duration;
            }
        }
    }

    timeline
}

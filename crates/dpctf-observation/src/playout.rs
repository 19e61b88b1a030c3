use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dpctf_core::{frame_at_ms, frame_duration_ms, DpctfError, FrameRate, ParametersDict, Result};

/// One `[switching_set, track, fragment]` step of a configured playout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 3]", into = "[u32; 3]")]
pub struct PlayoutEntry {
    pub switching_set: u32,
    pub track: u32,
    pub fragment: u32,
}

impl PlayoutEntry {
    pub fn new(switching_set: u32, track: u32, fragment: u32) -> Self {
        Self {
            switching_set,
            track,
            fragment,
        }
    }

    fn same_representation(&self, other: &PlayoutEntry) -> bool {
        self.switching_set == other.switching_set && self.track == other.track
    }
}

impl From<[u32; 3]> for PlayoutEntry {
    fn from(v: [u32; 3]) -> Self {
        PlayoutEntry::new(v[0], v[1], v[2])
    }
}

impl From<PlayoutEntry> for [u32; 3] {
    fn from(e: PlayoutEntry) -> Self {
        [e.switching_set, e.track, e.fragment]
    }
}

/// How playback moves from one representation to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Another track of the same switching set.
    Switching,
    /// Another switching set, i.e. a new period of different content.
    Splicing,
}

/// Which representation changes count as a switch position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKey {
    Track,
    SetAndTrack,
}

/// Fragment durations in ms, per track and per `(switching_set, track)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentDurations {
    by_track: BTreeMap<u32, f64>,
    by_set_track: BTreeMap<(u32, u32), f64>,
}

impl FragmentDurations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_track(&mut self, track: u32, duration_ms: f64) {
        self.by_track.insert(track, duration_ms);
    }

    pub fn insert_set_track(&mut self, switching_set: u32, track: u32, duration_ms: f64) {
        self.by_set_track.insert((switching_set, track), duration_ms);
    }

    /// Read `fragment_duration_list` and `fragment_duration_multi_mpd` when present.
    pub fn from_params(params: &ParametersDict) -> Result<Self> {
        let mut durations = Self::new();
        if params.contains("fragment_duration_list") {
            let list: BTreeMap<String, f64> = params.get("fragment_duration_list")?;
            for (track, duration) in list {
                let track = track.parse::<u32>().map_err(|_| {
                    DpctfError::Config(format!(
                        "Invalid track '{track}' in 'fragment_duration_list'"
                    ))
                })?;
                durations.insert_track(track, duration);
            }
        }
        if params.contains("fragment_duration_multi_mpd") {
            let list: Vec<(u32, u32, f64)> = params.get("fragment_duration_multi_mpd")?;
            for (set, track, duration) in list {
                durations.insert_set_track(set, track, duration);
            }
        }
        Ok(durations)
    }

    pub fn is_empty(&self) -> bool {
        self.by_track.is_empty() && self.by_set_track.is_empty()
    }

    pub fn track(&self, track: u32) -> Result<f64> {
        self.by_track.get(&track).copied().ok_or_else(|| {
            DpctfError::Config(format!("No fragment duration for track {track}"))
        })
    }

    pub fn set_track(&self, switching_set: u32, track: u32) -> Result<f64> {
        self.by_set_track
            .get(&(switching_set, track))
            .copied()
            .ok_or_else(|| {
                DpctfError::Config(format!(
                    "No fragment duration for switching set {switching_set} track {track}"
                ))
            })
    }

    /// Duration of one fragment of `entry`'s representation.
    pub fn for_entry(&self, entry: &PlayoutEntry) -> Result<f64> {
        if self.by_set_track.is_empty() {
            self.track(entry.track)
        } else {
            self.set_track(entry.switching_set, entry.track)
        }
    }
}

// =============================================================================
// Playout reconciliation
// =============================================================================

/// Track played for each fragment.
pub fn switching_playout(playout: &[PlayoutEntry]) -> Vec<u32> {
    playout.iter().map(|e| e.track).collect()
}

/// Collapse consecutive repeats: `[1,1,2,2,1]` becomes `[1,2,1]`.
pub fn playout_sequence(tracks: &[u32]) -> Vec<u32> {
    let mut sequence: Vec<u32> = Vec::new();
    for &track in tracks {
        if sequence.last() != Some(&track) {
            sequence.push(track);
        }
    }
    sequence
}

fn is_change(prev: &PlayoutEntry, curr: &PlayoutEntry, key: PositionKey) -> bool {
    match key {
        PositionKey::Track => prev.track != curr.track,
        PositionKey::SetAndTrack => !prev.same_representation(curr),
    }
}

/// Media positions in ms where the representation changes, starting with 0.
pub fn switching_positions(
    playout: &[PlayoutEntry],
    durations: &FragmentDurations,
    key: PositionKey,
) -> Result<Vec<f64>> {
    let mut positions = vec![0.0];
    let mut position = 0.0;
    for pair in playout.windows(2) {
        position += durations.for_entry(&pair[0])?;
        if is_change(&pair[0], &pair[1], key) {
            positions.push(position);
        }
    }
    Ok(positions)
}

/// Kind of every representation change in the playout.
pub fn change_type_list(playout: &[PlayoutEntry]) -> Vec<ChangeType> {
    playout
        .windows(2)
        .filter(|pair| !pair[0].same_representation(&pair[1]))
        .map(|pair| {
            if pair[0].switching_set != pair[1].switching_set {
                ChangeType::Splicing
            } else {
                ChangeType::Switching
            }
        })
        .collect()
}

/// Last entry played before each representation change.
pub fn ending_playout_list(playout: &[PlayoutEntry]) -> Vec<PlayoutEntry> {
    playout
        .windows(2)
        .filter(|pair| !pair[0].same_representation(&pair[1]))
        .map(|pair| pair[0])
        .collect()
}

/// First entry played after each representation change.
pub fn starting_playout_list(playout: &[PlayoutEntry]) -> Vec<PlayoutEntry> {
    playout
        .windows(2)
        .filter(|pair| !pair[0].same_representation(&pair[1]))
        .map(|pair| pair[1])
        .collect()
}

/// Cumulative end time of every splicing period except the last, in ms.
///
/// Entry `k` is where period `k + 1` starts on the presentation timeline.
pub fn splicing_period_list(
    playout: &[PlayoutEntry],
    durations: &FragmentDurations,
) -> Result<Vec<f64>> {
    let mut periods = Vec::new();
    let mut elapsed = 0.0;
    for pair in playout.windows(2) {
        elapsed += durations.for_entry(&pair[0])?;
        if pair[0].switching_set != pair[1].switching_set {
            periods.push(elapsed);
        }
    }
    Ok(periods)
}

/// Sum of the durations of every played fragment.
pub fn total_playout_duration(
    playout: &[PlayoutEntry],
    durations: &FragmentDurations,
) -> Result<f64> {
    playout
        .iter()
        .map(|e| durations.for_entry(e))
        .sum::<Result<f64>>()
}

/// Frame number showing at `position_ms`, optionally sampling the middle of
/// the frame to absorb rounding of the position.
pub fn expected_frame_num(position_ms: f64, rate: &FrameRate, half_frame: bool) -> i64 {
    let position = if half_frame {
        position_ms + frame_duration_ms(rate) / 2.0
    } else {
        position_ms
    };
    frame_at_ms(position, rate)
}

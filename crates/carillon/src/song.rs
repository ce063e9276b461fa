//! Melody files and the song catalog
//!
//! Songs are standard MIDI files named `"<number> <title>.mid"`, where the
//! number is the hymnal (Gotteslob) number, e.g. `"524 Meerstern ich dich
//! grüße.mid"` or `"897,2 Lourdes Lied.mid"`. Only the first track is read.
//! Its note events are flattened into `(note, velocity, delay)` triples with
//! the delay measured in real time before the event.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Tempo assumed until the track sets one (120 bpm).
pub const DEFAULT_TEMPO_US: u32 = 500_000;

/// Playback speeds accepted by [`Song::with_tempo`], relative to the file.
pub const TEMPO_SCALES: RangeInclusive<f64> = 0.25..=4.0;

/// Error type for song loading and lookup
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse MIDI file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Song directory not found: {0}")]
    DirectoryMissing(PathBuf),

    #[error("No song titled {0:?} in the catalog")]
    MissingSong(String),

    #[error("Tempo scale {0} outside 0.25..=4")]
    InvalidTempo(f64),
}

/// One note event of a melody.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MelodyEvent {
    pub note: u8,
    /// 0 releases the note
    pub velocity: u8,
    /// Wait before this event
    pub delay: Duration,
}

impl MelodyEvent {
    pub fn is_strike(&self) -> bool {
        self.velocity > 0
    }
}

/// A parsed melody.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub title: String,
    /// Hymnal number, e.g. "524" or "897,2"
    pub number: Option<String>,
    pub path: PathBuf,
    pub events: Vec<MelodyEvent>,
}

fn song_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{1,3}(?:,\d)?) (.+)$").expect("song name pattern is valid"))
}

/// Split a file stem into hymnal number and title.
pub fn parse_song_name(stem: &str) -> (Option<String>, String) {
    match song_name_pattern().captures(stem) {
        Some(caps) => (Some(caps[1].to_string()), caps[2].trim().to_string()),
        None => (None, stem.trim().to_string()),
    }
}

impl Song {
    /// Load and parse a song file.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let bytes = std::fs::read(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (number, title) = parse_song_name(&stem);

        let events = parse_events(&bytes).map_err(|message| CatalogError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

        Ok(Self {
            title,
            number,
            path: path.to_path_buf(),
            events,
        })
    }

    /// Total playing time.
    pub fn duration(&self) -> Duration {
        self.events.iter().map(|e| e.delay).sum()
    }

    /// Number of bells struck.
    pub fn strike_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_strike()).count()
    }

    /// Copy shifted by `semitones`. Notes pushed outside 0..=127 are dropped
    /// and their delay carried to the next event.
    pub fn transposed(&self, semitones: i8) -> Self {
        let mut carried = Duration::ZERO;
        let mut events = Vec::with_capacity(self.events.len());
        for event in &self.events {
            let shifted = event.note as i16 + semitones as i16;
            if (0..=127).contains(&shifted) {
                events.push(MelodyEvent {
                    note: shifted as u8,
                    delay: event.delay + carried,
                    ..*event
                });
                carried = Duration::ZERO;
            } else {
                carried += event.delay;
            }
        }

        Self {
            events,
            ..self.clone()
        }
    }

    /// Copy played `scale` times as fast as written.
    pub fn with_tempo(&self, scale: f64) -> Result<Self, CatalogError> {
        if !TEMPO_SCALES.contains(&scale) {
            return Err(CatalogError::InvalidTempo(scale));
        }
        let events = self
            .events
            .iter()
            .map(|event| MelodyEvent {
                delay: Duration::from_nanos((event.delay.as_nanos() as f64 / scale).round() as u64),
                ..*event
            })
            .collect();
        Ok(Self {
            events,
            ..self.clone()
        })
    }

    /// Transposed and tempo-scaled copy. The identity arrangement returns
    /// the song unchanged.
    pub fn arranged(&self, semitones: i8, tempo: f64) -> Result<Self, CatalogError> {
        let song = if semitones == 0 {
            self.clone()
        } else {
            self.transposed(semitones)
        };
        if tempo == 1.0 {
            Ok(song)
        } else {
            song.with_tempo(tempo)
        }
    }
}

/// Flatten the first track into melody events.
///
/// The initial tempo is the first set-tempo in the track; later tempo
/// changes apply from where they occur. Deltas of skipped events accumulate
/// into the next note's delay.
pub fn parse_events(bytes: &[u8]) -> Result<Vec<MelodyEvent>, String> {
    let smf = Smf::parse(bytes).map_err(|e| e.to_string())?;

    let ppq = match smf.header.timing {
        Timing::Metrical(ticks) => ticks.as_int() as u64,
        Timing::Timecode(..) => return Err("SMPTE timecode timing is not supported".to_string()),
    };
    if ppq == 0 {
        return Err("zero ticks per beat".to_string());
    }

    let track = smf.tracks.first().ok_or_else(|| "file has no tracks".to_string())?;

    let mut tempo = track
        .iter()
        .find_map(|event| match event.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some(t.as_int()),
            _ => None,
        })
        .unwrap_or(DEFAULT_TEMPO_US) as u64;

    let mut events = Vec::new();
    let mut pending_us: u64 = 0;

    for event in track {
        pending_us += event.delta.as_int() as u64 * tempo / ppq;

        let (note, velocity) = match event.kind {
            TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, vel },
                ..
            } => (key.as_int(), vel.as_int()),
            TrackEventKind::Midi {
                message: MidiMessage::NoteOff { key, .. },
                ..
            } => (key.as_int(), 0),
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => {
                tempo = t.as_int() as u64;
                continue;
            }
            _ => continue,
        };

        events.push(MelodyEvent {
            note,
            velocity,
            delay: Duration::from_micros(pending_us),
        });
        pending_us = 0;
    }

    Ok(events)
}

/// Listing entry for a catalog song
#[derive(Debug, Clone, Serialize)]
pub struct SongSummary {
    pub id: usize,
    pub title: String,
    pub number: Option<String>,
    pub strikes: usize,
    pub duration_secs: f64,
}

/// All songs found under the song directory, in path order.
#[derive(Debug, Default)]
pub struct SongCatalog {
    songs: Vec<Arc<Song>>,
}

impl SongCatalog {
    /// Recursively load every `*.mid` under `dir`. Unreadable files are
    /// skipped with a warning.
    pub fn load(dir: &Path) -> Result<Self, CatalogError> {
        if !dir.is_dir() {
            return Err(CatalogError::DirectoryMissing(dir.to_path_buf()));
        }

        let mut songs = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            let is_midi = entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .map(|ext| ext.eq_ignore_ascii_case("mid"))
                    .unwrap_or(false);
            if !is_midi {
                continue;
            }

            match Song::from_file(entry.path()) {
                Ok(song) => {
                    debug!("Loaded {:?} ({} events)", song.title, song.events.len());
                    songs.push(Arc::new(song));
                }
                Err(e) => warn!("{}", e),
            }
        }

        info!("Loaded {} songs from {}", songs.len(), dir.display());
        Ok(Self { songs })
    }

    pub fn from_songs(songs: Vec<Song>) -> Self {
        Self {
            songs: songs.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<Arc<Song>> {
        self.songs.get(id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Song>> {
        self.songs.iter()
    }

    pub fn summaries(&self) -> Vec<SongSummary> {
        self.songs
            .iter()
            .enumerate()
            .map(|(id, song)| summarize(id, song))
            .collect()
    }

    pub fn summary(&self, id: usize) -> Option<SongSummary> {
        self.songs.get(id).map(|song| summarize(id, song))
    }

    /// Song with the given hymnal number.
    pub fn search_number(&self, number: &str) -> Option<Arc<Song>> {
        let number = number.trim();
        self.songs
            .iter()
            .find(|s| s.number.as_deref() == Some(number))
            .cloned()
    }

    /// Songs whose title contains `fragment`, ignoring case.
    pub fn search_title(&self, fragment: &str) -> Vec<Arc<Song>> {
        let fragment = fragment.to_lowercase();
        self.songs
            .iter()
            .filter(|s| s.title.to_lowercase().contains(&fragment))
            .cloned()
            .collect()
    }

    /// Song whose whole title matches, ignoring case.
    pub fn find_title(&self, title: &str) -> Option<Arc<Song>> {
        let title = title.to_lowercase();
        self.songs
            .iter()
            .find(|s| s.title.to_lowercase() == title)
            .cloned()
    }

    /// Like `find_title`, but a missing song is an error.
    pub fn require(&self, title: &str) -> Result<Arc<Song>, CatalogError> {
        self.find_title(title)
            .ok_or_else(|| CatalogError::MissingSong(title.to_string()))
    }

    /// Catalog id of a loaded song handle.
    pub fn id_of(&self, song: &Arc<Song>) -> Option<usize> {
        self.songs.iter().position(|s| Arc::ptr_eq(s, song))
    }
}

fn summarize(id: usize, song: &Song) -> SongSummary {
    SongSummary {
        id,
        title: song.title.clone(),
        number: song.number.clone(),
        strikes: song.strike_count(),
        duration_secs: song.duration().as_secs_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Format, Header, TrackEvent};
    use pretty_assertions::assert_eq;

    enum Ev {
        On(u32, u8),
        Off(u32, u8),
        Tempo(u32, u32),
        Program(u32),
    }

    fn midi_bytes(ppq: u16, events: &[Ev]) -> Vec<u8> {
        let mut track = Vec::new();
        for ev in events {
            let (delta, kind) = match *ev {
                Ev::On(d, key) => (
                    d,
                    TrackEventKind::Midi {
                        channel: u4::new(0),
                        message: MidiMessage::NoteOn {
                            key: u7::new(key),
                            vel: u7::new(100),
                        },
                    },
                ),
                Ev::Off(d, key) => (
                    d,
                    TrackEventKind::Midi {
                        channel: u4::new(0),
                        message: MidiMessage::NoteOff {
                            key: u7::new(key),
                            vel: u7::new(0),
                        },
                    },
                ),
                Ev::Tempo(d, us) => (d, TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us)))),
                Ev::Program(d) => (
                    d,
                    TrackEventKind::Midi {
                        channel: u4::new(0),
                        message: MidiMessage::ProgramChange {
                            program: u7::new(14),
                        },
                    },
                ),
            };
            track.push(TrackEvent {
                delta: u28::new(delta),
                kind,
            });
        }
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let mut smf = Smf::new(Header::new(Format::SingleTrack, Timing::Metrical(u15::new(ppq))));
        smf.tracks.push(track);

        let mut bytes = Vec::new();
        smf.write_std(&mut bytes).unwrap();
        bytes
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_parse_song_name() {
        assert_eq!(
            parse_song_name("524 Meerstern ich dich grüße"),
            (Some("524".to_string()), "Meerstern ich dich grüße".to_string())
        );
        assert_eq!(
            parse_song_name("897,2 Lourdes Lied"),
            (Some("897,2".to_string()), "Lourdes Lied".to_string())
        );
        assert_eq!(parse_song_name("Salve Regina"), (None, "Salve Regina".to_string()));
        // Four digits are not a hymnal number
        assert_eq!(parse_song_name("1234 Glocke"), (None, "1234 Glocke".to_string()));
    }

    #[test]
    fn test_delays_use_first_tempo() {
        // 480 ppq at 600_000 us/beat: 240 ticks = 300 ms
        let bytes = midi_bytes(
            480,
            &[
                Ev::Tempo(0, 600_000),
                Ev::On(0, 60),
                Ev::Off(240, 60),
                Ev::On(0, 62),
                Ev::Off(480, 62),
            ],
        );

        let events = parse_events(&bytes).unwrap();
        assert_eq!(
            events,
            vec![
                MelodyEvent { note: 60, velocity: 100, delay: ms(0) },
                MelodyEvent { note: 60, velocity: 0, delay: ms(300) },
                MelodyEvent { note: 62, velocity: 100, delay: ms(0) },
                MelodyEvent { note: 62, velocity: 0, delay: ms(600) },
            ]
        );
    }

    #[test]
    fn test_default_tempo_and_skipped_deltas_carry() {
        // No tempo meta: 500_000 us/beat at 100 ppq = 5 ms per tick
        let bytes = midi_bytes(100, &[Ev::On(0, 50), Ev::Program(20), Ev::On(30, 52)]);

        let events = parse_events(&bytes).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].delay, ms(250));
    }

    #[test]
    fn test_tempo_change_mid_track() {
        let bytes = midi_bytes(
            100,
            &[
                Ev::Tempo(0, 500_000),
                Ev::On(100, 50),
                Ev::Tempo(0, 1_000_000),
                Ev::On(100, 52),
            ],
        );

        let events = parse_events(&bytes).unwrap();
        assert_eq!(events[0].delay, ms(500));
        assert_eq!(events[1].delay, ms(1000));
    }

    #[test]
    fn test_transposed_drops_out_of_range_notes() {
        let song = Song {
            title: "Tonleiter".to_string(),
            number: None,
            path: PathBuf::from("Tonleiter.mid"),
            events: vec![
                MelodyEvent { note: 120, velocity: 90, delay: ms(10) },
                MelodyEvent { note: 60, velocity: 90, delay: ms(20) },
            ],
        };

        let up = song.transposed(10);
        assert_eq!(up.events, vec![MelodyEvent { note: 70, velocity: 90, delay: ms(30) }]);
        assert_eq!(song.transposed(-2).events[0].note, 118);
    }

    #[test]
    fn test_with_tempo_scales_delays() {
        let song = Song {
            title: "Tonleiter".to_string(),
            number: None,
            path: PathBuf::from("Tonleiter.mid"),
            events: vec![
                MelodyEvent { note: 60, velocity: 90, delay: ms(0) },
                MelodyEvent { note: 62, velocity: 90, delay: ms(400) },
            ],
        };

        let faster = song.with_tempo(2.0).unwrap();
        assert_eq!(faster.events[1].delay, ms(200));
        assert_eq!(faster.duration(), ms(200));
        assert_eq!(song.with_tempo(0.5).unwrap().duration(), ms(800));

        assert!(matches!(song.with_tempo(0.0), Err(CatalogError::InvalidTempo(_))));
        assert!(matches!(song.with_tempo(f64::NAN), Err(CatalogError::InvalidTempo(_))));
        assert!(song.with_tempo(8.0).is_err());

        let arranged = song.arranged(-12, 2.0).unwrap();
        assert_eq!(arranged.events[1].note, 50);
        assert_eq!(arranged.events[1].delay, ms(200));
        assert_eq!(song.arranged(0, 1.0).unwrap(), song);
    }

    #[test]
    fn test_catalog_load_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("marian");
        std::fs::create_dir(&nested).unwrap();

        let tune = midi_bytes(480, &[Ev::On(0, 60), Ev::Off(480, 60)]);
        std::fs::write(dir.path().join("897,2 Lourdes Lied.mid"), &tune).unwrap();
        std::fs::write(nested.join("666 Salve Regina.mid"), &tune).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a song").unwrap();
        std::fs::write(dir.path().join("broken.mid"), b"MThd garbage").unwrap();

        let catalog = SongCatalog::load(dir.path()).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.search_number("666").unwrap().title, "Salve Regina");
        assert_eq!(catalog.search_number("897,2").unwrap().title, "Lourdes Lied");
        assert!(catalog.search_number("1").is_none());
        assert_eq!(catalog.search_title("regina").len(), 1);
        assert!(catalog.find_title("lourdes lied").is_some());
        assert!(catalog.find_title("Lourdes").is_none());

        let song = catalog.require("Salve Regina").unwrap();
        let id = catalog.id_of(&song).unwrap();
        assert_eq!(catalog.summary(id).unwrap().strikes, 1);
    }

    #[test]
    fn test_require_missing_song() {
        let catalog = SongCatalog::default();
        assert!(matches!(
            catalog.require("Te Deum"),
            Err(CatalogError::MissingSong(title)) if title == "Te Deum"
        ));
    }

    #[test]
    fn test_load_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            SongCatalog::load(&missing),
            Err(CatalogError::DirectoryMissing(_))
        ));
    }
}

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tempfile::TempDir;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

fn write_file(path: &Path, body: &str) -> TestResult {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)?;
    Ok(())
}

fn play(user: &str, ts: i64, song: &str) -> Value {
    json!({
        "firstName": "Lily",
        "lastName": "Koch",
        "gender": "F",
        "level": "paid",
        "page": "NextSong",
        "sessionId": 818,
        "song": song,
        "ts": ts,
        "userId": user,
        "location": "Chicago-Naperville-Elgin, IL-IN-WI",
        "userAgent": "Mozilla/5.0 (X11; Linux x86_64)"
    })
}

/// Input tree with two songs and three events (two plays) under
/// `<tmp>/input`. Returns the input root.
pub fn write_input(tmp: &TempDir) -> TestResult<PathBuf> {
    let input = tmp.path().join("input");

    let songs = [
        ("A/A/A/TRAAAAK128F9318786.json", "SOBLFFE12AF72AA5BA", "Scream", 2009),
        ("A/A/B/TRAABCL128F4286650.json", "SOQHXMF12AB0182363", "Young Boy Blues", 0),
    ];
    for (rel, song_id, title, year) in songs {
        let record = json!({
            "num_songs": 1,
            "artist_id": "ARJNIUY12298900C91",
            "artist_latitude": null,
            "artist_longitude": null,
            "artist_location": "",
            "artist_name": "Adelitas Way",
            "song_id": song_id,
            "title": title,
            "duration": 213.9424,
            "year": year
        });
        write_file(&input.join("song_data").join(rel), &record.to_string())?;
    }

    let events = [
        play("15", 1_542_241_826_796, "Scream"),
        json!({"page": "Home", "userId": "15", "ts": 1_542_241_900_000_i64}),
        play("15", 1_542_242_481_796, "Not In The Catalog"),
    ];
    let body = events
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n");
    write_file(&input.join("log_data/2018/11/2018-11-15-events.json"), &body)?;

    Ok(input)
}

pub fn write_config(tmp: &TempDir, body: &str) -> TestResult<PathBuf> {
    let path = tmp.path().join("songplay-lake.toml");
    write_file(&path, body)?;
    Ok(path)
}

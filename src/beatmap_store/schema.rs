//! Database schema for beatmaps.db.
//!
//! The canonical recording tables (`artist_credit`, `recording`, `track`,
//! `recording_gid_redirect`) follow the layout of the replicated MusicBrainz
//! tables they mirror. They are created here so a fresh database is usable,
//! but their content is owned by replication and only read by this crate.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

const SITES_TABLE_V0: Table = Table {
    name: "sites",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("code", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("url_base", &SqlType::Text, non_null = true),
        sqlite_column!(
            "url_suffix",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

const ARTIST_CREDIT_TABLE_V0: Table = Table {
    name: "artist_credit",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const RECORDING_TABLE_V0: Table = Table {
    name: "recording",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("gid", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!(
            "artist_credit",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "artist_credit",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::NoAction,
            })
        ),
        // Milliseconds
        sqlite_column!("length", &SqlType::Integer),
    ],
    indices: &[("idx_recording_artist_credit", "artist_credit")],
    unique_constraints: &[],
};

const TRACK_TABLE_V0: Table = Table {
    name: "track",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "recording",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "recording",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::NoAction,
            })
        ),
    ],
    indices: &[("idx_track_recording", "recording")],
    unique_constraints: &[],
};

const RECORDING_GID_REDIRECT_TABLE_V0: Table = Table {
    name: "recording_gid_redirect",
    columns: &[
        sqlite_column!("gid", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "new_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "recording",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::NoAction,
            })
        ),
    ],
    indices: &[],
    unique_constraints: &[],
};

const BEATMAPS_TABLE_V0: Table = Table {
    name: "beatmaps",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "site_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "sites",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("external_id", &SqlType::Text, non_null = true),
        sqlite_column!("artist", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("choreographer", &SqlType::Text),
        sqlite_column!("release_date", &SqlType::Integer),
        sqlite_column!("duration", &SqlType::Real),
        sqlite_column!("raw_metadata", &SqlType::Text),
        sqlite_column!("state", &SqlType::Text, non_null = true),
        sqlite_column!("fingerprint", &SqlType::Text),
        sqlite_column!("fingerprint_duration", &SqlType::Real),
        sqlite_column!("track_id", &SqlType::Text),
        sqlite_column!(
            "recording_gid",
            &SqlType::Text,
            foreign_key = Some(&ForeignKey {
                foreign_table: "recording",
                foreign_column: "gid",
                on_delete: ForeignKeyOnChange::NoAction,
            })
        ),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("last_checked", &SqlType::Integer, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_beatmaps_state_checked", "state, last_checked, id"),
        ("idx_beatmaps_last_checked", "last_checked"),
        ("idx_beatmaps_recording", "recording_gid"),
    ],
    unique_constraints: &[&["site_id", "external_id"]],
};

pub const BEATMAP_DB_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        SITES_TABLE_V0,
        ARTIST_CREDIT_TABLE_V0,
        RECORDING_TABLE_V0,
        TRACK_TABLE_V0,
        RECORDING_GID_REDIRECT_TABLE_V0,
        BEATMAPS_TABLE_V0,
    ],
    migration: None,
}];

/// Sites known out of the box: (code, name, url_base, url_suffix).
pub const SEED_SITES: &[(&str, &str, &str, &str)] = &[
    ("bs", "Beat Saber", "https://beatsaver.com/maps/", ""),
    ("osu", "osu!", "https://osu.ppy.sh/beatmapsets/", ""),
];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn schema_creates_and_validates() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = &BEATMAP_DB_VERSIONED_SCHEMAS[0];
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }

    #[test]
    fn duplicate_site_and_external_id_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        BEATMAP_DB_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        conn.execute(
            "INSERT INTO sites (code, name, url_base) VALUES ('bs', 'Beat Saber', 'https://beatsaver.com/maps/')",
            [],
        )
        .unwrap();

        let insert = "INSERT INTO beatmaps (site_id, external_id, artist, title, state, last_checked, created_at) VALUES (1, 'abc', 'a', 't', 'INITIAL', 0, 0)";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }

    #[test]
    fn recording_link_must_point_at_existing_recording() {
        let conn = Connection::open_in_memory().unwrap();
        BEATMAP_DB_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        conn.execute(
            "INSERT INTO sites (code, name, url_base) VALUES ('bs', 'Beat Saber', 'x')",
            [],
        )
        .unwrap();

        let result = conn.execute(
            "INSERT INTO beatmaps (site_id, external_id, artist, title, state, recording_gid, last_checked, created_at) VALUES (1, 'abc', 'a', 't', 'MATCHED_WITH_STRING', 'missing-gid', 0, 0)",
            [],
        );
        assert!(result.is_err());
    }
}

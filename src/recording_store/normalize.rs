use anyhow::Result;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;

/// Case-insensitive key used to compare titles and artist credits.
///
/// Unicode lowercase mapping, so `Ä` and `ä` match, while the string is
/// otherwise compared verbatim. This is not full case folding: expansions
/// such as `ß` to `ss` are not applied, so `Straße` and `STRASSE` differ.
pub fn casefold(s: &str) -> String {
    s.to_lowercase()
}

/// Registers `casefold(text)` as a deterministic SQL function on `conn`.
pub fn register_casefold(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "casefold",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|s| casefold(&s)))
        },
    )?;
    Ok(())
}

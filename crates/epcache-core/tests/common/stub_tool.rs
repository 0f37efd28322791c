//! Executable stand-ins for external tools.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// An `ffmpeg` replacement: fails unless the file after `-i` exists (as seen
/// from its working directory), otherwise writes `merged` to the last argument.
const FAKE_FFMPEG: &str = r#"#!/bin/sh
input=""
prev=""
out=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then input="$arg"; fi
  prev="$arg"
  out="$arg"
done
[ -f "$input" ] || exit 1
printf merged > "$out"
"#;

pub fn fake_ffmpeg(dir: &Path) -> PathBuf {
    let path = dir.join("fake-ffmpeg");
    fs::write(&path, FAKE_FFMPEG).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

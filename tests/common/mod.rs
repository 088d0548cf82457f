#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

#[path = "../../src/test_common.rs"]
mod synthetic;
pub use synthetic::*;

/// A run over `names` under `dir/level1`, with a legacy run list and patch
/// definition file for the `co7` patch, and a 2x2 cube of `cube_value`.
///
/// Returns the parameter file path.
pub fn setup_run(dir: &Path, names: &[&str], cube_value: f32) -> PathBuf {
    let in_dir = dir.join("level1");
    for name in names {
        let path = in_dir.join(name.trim_start_matches('/'));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        write_synthetic_level1(&path, &SyntheticLevel1::default()).unwrap();
    }
    write_uniform_cube(&dir.join("cube.npy"), 2, 2, cube_value).unwrap();

    let runlist_path = dir.join("runlist.txt");
    fs::write(
        &runlist_path,
        format!(
            "1\nco7 {}\n 6944 58681.74 58681.79 {} co7 ces 0 0\n{}\n",
            names.len(),
            names.len(),
            names.join("\n")
        ),
    )
    .unwrap();
    let patch_path = dir.join("patches.txt");
    fs::write(
        &patch_path,
        format!(
            "co2 25.435 0.000 1 2\nco7 {:.1} {:.1} 1 2\n",
            FIELD_CENTRE.0, FIELD_CENTRE.1
        ),
    )
    .unwrap();

    let param_path = dir.join("params.yml");
    fs::write(
        &param_path,
        format!(
            "datacube: {}\n\
             tod_in_dir: {}\n\
             tod_out_dir: {}\n\
             runlist: {}\n\
             patch_definition_file: {}\n\
             nside: 2\n",
            dir.join("cube.npy").display(),
            in_dir.display(),
            dir.join("level1_sim").display(),
            runlist_path.display(),
            patch_path.display(),
        ),
    )
    .unwrap();
    param_path
}

//! Resolve an installation by scanning, then run it through the controller.
//!
//! Kept as the only test in this binary: it writes an executable script and then
//! executes it, which must not race with forks from other test threads.
#![cfg(unix)]

use eplaunch_lite::install::label_installation;
use eplaunch_lite::{
    InstallationResolver, ResolverConfig, RunCallbacks, RunController, RunOutcome, RunRequest,
    RunState, VersionOrdering,
};
use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn fake_install(root: &std::path::Path, name: &str, banner: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    let exe = dir.join("energyplus");
    std::fs::write(
        &exe,
        format!(
            "#!/bin/sh\n\
             if [ \"$1\" = --version ]; then\n\
             echo 'EnergyPlus, Version 23.2.0-7636e6b3e9'\nexit 0\nfi\n\
             echo {banner}\necho \"$1 $2\" >&2\nexit 0\n"
        ),
    )
    .unwrap();
    std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
async fn resolves_newest_install_and_runs_it() {
    let tmp = TempDir::new().unwrap();
    let installs = tmp.path().join("installs");
    fake_install(&installs, "EnergyPlus-9-6-0", "old");
    fake_install(&installs, "EnergyPlus-23-2-0", "new");
    std::fs::create_dir_all(installs.join("EnergyPlus-24-1-0")).unwrap();
    fake_install(tmp.path(), "custom-build", "custom");

    let models = tmp.path().join("models");
    std::fs::create_dir_all(&models).unwrap();
    let input = models.join("office.idf");
    let weather = models.join("chicago.epw");
    std::fs::write(&input, "Version,23.2;").unwrap();
    std::fs::write(&weather, "LOCATION").unwrap();

    let resolver = InstallationResolver::new(ResolverConfig {
        default_root: installs.clone(),
        ordering: VersionOrdering::Numeric,
    });
    let resolved = resolver.resolve(None).unwrap();
    assert!(resolved.valid);
    assert_eq!(resolved.root, installs.join("EnergyPlus-23-2-0"));
    assert_eq!(resolved.descriptor(), "EnergyPlus 23.2.0");
    let executable = resolved.executable.clone().unwrap();

    // No version in the directory name: ask the executable instead.
    let mut custom = resolver.resolve(Some(&tmp.path().join("custom-build"))).unwrap();
    assert!(custom.valid);
    assert_eq!(custom.descriptor(), "EnergyPlus (unknown version)");
    label_installation(&mut custom).await;
    assert_eq!(custom.descriptor(), "EnergyPlus 23.2.0");

    let statuses = Arc::new(Mutex::new(Vec::<String>::new()));
    let completed = Arc::new(Mutex::new(None));
    let callbacks = RunCallbacks::new()
        .on_status({
            let statuses = statuses.clone();
            move |msg| statuses.lock().unwrap().push(msg.to_string())
        })
        .on_success({
            let completed = completed.clone();
            move |out| *completed.lock().unwrap() = Some(out)
        });

    let mut controller = RunController::default();
    let handle = controller
        .start_with_callbacks(RunRequest::new(executable, &input, &weather), callbacks)
        .unwrap();

    let output = match handle.wait().await {
        RunOutcome::Completed(output) => output,
        other => panic!("expected a completed run, got {other:?}"),
    };
    assert_eq!(output.stdout, b"new\n");
    assert_eq!(
        String::from_utf8_lossy(&output.stderr).trim(),
        format!("{} {}", input.display(), weather.display())
    );
    assert_eq!(output.exit_code, Some(0));
    assert_eq!(output.run_dir, models);
    assert_eq!(controller.state(), RunState::Completed);

    // `wait` resolves only after the terminal callback has returned.
    assert_eq!(
        completed.lock().unwrap().as_ref().map(|o| o.stdout.clone()),
        Some(b"new\n".to_vec())
    );
    assert_eq!(statuses.lock().unwrap().first().map(String::as_str), Some("started"));
}

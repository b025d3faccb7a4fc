// Integration tests for the plate loader safety controller

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::time::Instant;
    use wellhost_rs::actuator::{
        Actuator, ActuatorError, ChannelConfirmation, MoveStyle, PlateLoader, SafetyProfile,
    };
    use wellhost_rs::config::LoaderConfig;
    use wellhost_rs::hardware::mock::{RecordingRelay, RecordingServos};

    const PLATE_1: u8 = 3;
    const PLATE_2: u8 = 6;
    const LID: u8 = 9;

    fn create_test_profiles() -> BTreeMap<String, SafetyProfile> {
        let mut profiles = BTreeMap::new();
        profiles.insert("shallow_plate".to_string(), SafetyProfile::new(50.0, 40.0, "Standard 96-well plate"));
        profiles.insert("disabled".to_string(), SafetyProfile::disabled("No checks"));
        profiles
    }

    async fn create_loader(servos: &RecordingServos) -> PlateLoader {
        PlateLoader::new(
            LoaderConfig::default(),
            create_test_profiles(),
            "shallow_plate",
            Box::new(servos.clone()),
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_homes_plate_then_lid() {
        let servos = RecordingServos::new();
        let loader = create_loader(&servos).await;
        assert_eq!(loader.positions(), (90.0, 50.0));
        assert_eq!(
            servos.commands(),
            vec![(PLATE_1, 180.0), (PLATE_2, 0.0), (LID, 50.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_plate_type_rejected() {
        let servos = RecordingServos::new();
        let result = PlateLoader::new(
            LoaderConfig::default(),
            create_test_profiles(),
            "nonexistent",
            Box::new(servos.clone()),
            None,
        )
        .await;
        match result {
            Err(ActuatorError::UnknownPlateType { name, available }) => {
                assert_eq!(name, "nonexistent");
                assert_eq!(available, vec!["disabled".to_string(), "shallow_plate".to_string()]);
            }
            _ => panic!("expected UnknownPlateType"),
        }
        assert!(servos.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plate_servos_are_mirrored() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        loader.open_lid(MoveStyle::Direct).await.unwrap();
        loader.move_plate_to(30.0, MoveStyle::Direct).await.unwrap();
        assert_eq!(servos.angle(PLATE_1), Some(120.0));
        assert_eq!(servos.angle(PLATE_2), Some(60.0));

        // Every smooth step keeps the pair mirrored.
        servos.clear();
        loader.move_plate_to(45.0, MoveStyle::Smooth).await.unwrap();
        let a = servos.commands_for(PLATE_1);
        let b = servos.commands_for(PLATE_2);
        assert_eq!(a.len(), b.len());
        assert!(a.iter().zip(&b).all(|(a, b)| a + b == 180.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lid_blocked_while_plate_raised() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        loader.open_lid(MoveStyle::Direct).await.unwrap();
        loader.move_plate_to(40.0, MoveStyle::Direct).await.unwrap();
        assert_eq!(loader.positions(), (40.0, 0.0));

        servos.clear();
        match loader.close_lid(MoveStyle::Smooth).await {
            Err(ActuatorError::CollisionRisk { actuator, target, plate_angle, lid_angle, profile }) => {
                assert_eq!(actuator, Actuator::Lid);
                assert_eq!(target, 50.0);
                assert_eq!((plate_angle, lid_angle), (40.0, 0.0));
                assert_eq!(profile, "shallow_plate");
            }
            other => panic!("expected CollisionRisk, got {:?}", other),
        }
        assert_eq!(loader.positions(), (40.0, 0.0));
        assert!(servos.commands().is_empty());

        loader.move_plate_to(60.0, MoveStyle::Smooth).await.unwrap();
        loader.close_lid(MoveStyle::Smooth).await.unwrap();
        assert_eq!(loader.positions(), (60.0, 50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plate_blocked_while_lid_closed() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        servos.clear();
        let result = loader.raise_plate(None, MoveStyle::Smooth).await;
        assert!(matches!(
            result,
            Err(ActuatorError::CollisionRisk { actuator: Actuator::Plate, target, .. }) if target == 0.0
        ));
        assert_eq!(loader.positions(), (90.0, 50.0));
        assert!(servos.commands().is_empty());

        // Staying on the safe side of the threshold is fine with the lid shut.
        loader.raise_plate(Some(40.0), MoveStyle::Direct).await.unwrap();
        assert_eq!(loader.positions(), (50.0, 50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_lid_twice_is_idempotent() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        loader.open_lid(MoveStyle::Smooth).await.unwrap();
        loader.close_lid(MoveStyle::Smooth).await.unwrap();
        let after_first = loader.positions();

        servos.clear();
        loader.close_lid(MoveStyle::Smooth).await.unwrap();
        assert_eq!(loader.positions(), after_first);
        assert_eq!(after_first.1, 50.0);
        assert!(servos.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_smooth_move_steps_and_timing() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        servos.clear();

        let start = Instant::now();
        loader.open_lid(MoveStyle::Smooth).await.unwrap();
        let elapsed = start.elapsed();

        let lid = servos.commands_for(LID);
        // 50 -> 0 at 2 degrees per step: 26 steps plus the explicit final set.
        assert_eq!(lid.len(), 27);
        assert_eq!(lid.first(), Some(&50.0));
        assert_eq!(&lid[lid.len() - 2..], &[0.0, 0.0]);
        assert!(lid.windows(2).all(|w| w[1] <= w[0]));
        assert!(elapsed >= Duration::from_millis(26 * 20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_smooth_move_uneven_step() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        loader.set_move_profile(7.0, Duration::from_millis(5)).unwrap();
        servos.clear();
        loader.open_lid(MoveStyle::Smooth).await.unwrap();
        assert_eq!(
            servos.commands_for(LID),
            vec![50.0, 43.0, 36.0, 29.0, 22.0, 15.0, 8.0, 1.0, 0.0]
        );
        assert!(matches!(
            loader.set_move_profile(0.0, Duration::ZERO),
            Err(ActuatorError::InvalidSpeed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanishing_step_size_rejected() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        assert!(matches!(
            loader.set_move_profile(1e-15, Duration::ZERO),
            Err(ActuatorError::InvalidSpeed(_))
        ));

        // The previous profile stays in force and smooth moves still finish.
        servos.clear();
        loader.open_lid(MoveStyle::Smooth).await.unwrap();
        assert_eq!(servos.commands_for(LID).len(), 27);

        let mut config = LoaderConfig::default();
        config.movement.default_move_speed = 1e-9;
        let result = PlateLoader::new(
            config,
            create_test_profiles(),
            "shallow_plate",
            Box::new(RecordingServos::new()),
            None,
        )
        .await;
        assert!(matches!(result, Err(ActuatorError::InvalidSpeed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relative_moves_stop_at_limits() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        loader.open_lid(MoveStyle::Direct).await.unwrap();

        loader.raise_plate(Some(30.0), MoveStyle::Direct).await.unwrap();
        assert_eq!(loader.positions().0, 60.0);
        loader.raise_plate(Some(100.0), MoveStyle::Direct).await.unwrap();
        assert_eq!(loader.positions().0, 0.0);
        loader.lower_plate(Some(25.0), MoveStyle::Direct).await.unwrap();
        assert_eq!(loader.positions().0, 25.0);
        loader.lower_plate(None, MoveStyle::Direct).await.unwrap();
        assert_eq!(loader.positions().0, 90.0);
        assert!(matches!(
            loader.raise_plate(Some(-5.0), MoveStyle::Direct).await,
            Err(ActuatorError::InvalidAngle(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_targets_are_clamped() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        loader.open_lid(MoveStyle::Direct).await.unwrap();

        loader.move_plate_to(200.0, MoveStyle::Direct).await.unwrap();
        assert_eq!(loader.positions().0, 90.0);
        loader.move_plate_to(-50.0, MoveStyle::Direct).await.unwrap();
        assert_eq!(loader.positions().0, -5.0);
        loader.rotate_lid(-10.0, MoveStyle::Direct).await.unwrap();
        assert_eq!(loader.positions().1, 0.0);
        assert!(matches!(
            loader.rotate_lid(f64::NAN, MoveStyle::Direct).await,
            Err(ActuatorError::InvalidAngle(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_plate() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        assert!(loader.pop_plate(MoveStyle::Smooth).await.is_err());

        loader.open_lid(MoveStyle::Smooth).await.unwrap();
        loader.pop_plate(MoveStyle::Smooth).await.unwrap();
        assert_eq!(loader.positions(), (-5.0, 0.0));
        assert_eq!(servos.angle(PLATE_1), Some(85.0));
        assert_eq!(servos.angle(PLATE_2), Some(95.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plate_type_switch_is_not_retroactive() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;

        loader.set_plate_type("disabled").unwrap();
        loader.raise_plate(None, MoveStyle::Direct).await.unwrap();
        assert_eq!(loader.positions(), (0.0, 50.0));
        assert!(!loader.collision_report().collision_risk);

        loader.set_plate_type("shallow_plate").unwrap();
        assert_eq!(loader.positions(), (0.0, 50.0));
        let report = loader.collision_report();
        assert!(report.collision_risk);
        assert_eq!(report.plate_type, "shallow_plate");
        assert_eq!(report.plate_safe_angle, Some(50.0));
        assert_eq!(report.lid_safe_angle, Some(40.0));

        // Further raising stays blocked; lowering out of the conflict is allowed.
        assert!(loader.pop_plate(MoveStyle::Direct).await.is_err());
        loader.lower_plate(None, MoveStyle::Direct).await.unwrap();
        assert!(!loader.collision_report().collision_risk);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_unknown_plate_type_keeps_profile() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        assert!(matches!(
            loader.set_plate_type("deep_well"),
            Err(ActuatorError::UnknownPlateType { .. })
        ));
        assert_eq!(loader.plate_type(), "shallow_plate");
        assert!(loader.profile().is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replace_profiles() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;

        let mut without_active = BTreeMap::new();
        without_active.insert("deep_well".to_string(), SafetyProfile::new(60.0, 30.0, "Deep"));
        assert!(loader.replace_profiles(without_active).is_err());
        assert_eq!(loader.available_plate_types(), vec!["disabled", "shallow_plate"]);

        let mut updated = create_test_profiles();
        updated.insert("shallow_plate".to_string(), SafetyProfile::new(70.0, 20.0, "Stricter"));
        loader.replace_profiles(updated).unwrap();
        assert_eq!(loader.profile().thresholds(), Some((70.0, 20.0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_sequence_waits_for_confirmation() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        let (tx, mut confirm) = ChannelConfirmation::channel();

        let task = tokio::spawn(async move {
            let result = loader.load_sequence(&mut confirm).await;
            (loader, result)
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        // Suspended with the lid open and the plate up.
        assert_eq!(servos.angle(LID), Some(0.0));
        assert_eq!(servos.angle(PLATE_1), Some(90.0));
        assert!(!task.is_finished());

        tx.send(()).await.unwrap();
        let (loader, result) = task.await.unwrap();
        result.unwrap();
        assert_eq!(loader.positions(), (90.0, 50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_sequence_aborts_when_sender_dropped() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        let (tx, mut confirm) = ChannelConfirmation::channel();
        drop(tx);

        let result = loader.unload_sequence(&mut confirm).await;
        assert!(matches!(result, Err(ActuatorError::Aborted(_))));
        // Stopped at the hand-off point, nothing undone.
        assert_eq!(loader.positions(), (0.0, 0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibrate_and_home() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        loader.open_lid(MoveStyle::Direct).await.unwrap();
        loader.calibrate().await.unwrap();
        assert_eq!(loader.positions(), (90.0, 50.0));
        // Full travel reached on both actuators along the way.
        assert!(servos.commands_for(PLATE_1).contains(&90.0));
        assert!(servos.commands_for(LID).contains(&0.0));

        loader.open_lid(MoveStyle::Direct).await.unwrap();
        loader.raise_plate(None, MoveStyle::Direct).await.unwrap();
        loader.home().await.unwrap();
        assert_eq!(loader.positions(), (90.0, 50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_save_and_restore() {
        let servos = RecordingServos::new();
        let relay = RecordingRelay::new();
        let config = LoaderConfig { power_relay_pin: Some(17), ..LoaderConfig::default() };
        let mut loader = PlateLoader::new(
            config,
            create_test_profiles(),
            "shallow_plate",
            Box::new(servos.clone()),
            Some(Box::new(relay.clone())),
        )
        .await
        .unwrap();
        assert_eq!(relay.states(), vec![(17, true)]);

        loader.power_save().unwrap();
        assert_eq!(servos.released(), vec![PLATE_1, PLATE_2, LID]);
        assert_eq!(servos.angle(LID), None);
        assert_eq!(relay.is_on(17), Some(false));
        assert_eq!(loader.positions(), (90.0, 50.0));

        loader.power_restore().unwrap();
        assert_eq!(relay.is_on(17), Some(true));
        assert_eq!(servos.angle(PLATE_1), Some(180.0));
        assert_eq!(servos.angle(PLATE_2), Some(0.0));
        assert_eq!(servos.angle(LID), Some(50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_and_shutdown() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        loader.release_lid_motor().unwrap();
        assert_eq!(servos.released(), vec![LID]);
        loader.release_plate_motors().unwrap();
        assert_eq!(servos.released(), vec![LID, PLATE_1, PLATE_2]);

        loader.power_restore().unwrap();
        loader.open_lid(MoveStyle::Direct).await.unwrap();
        loader.raise_plate(None, MoveStyle::Direct).await.unwrap();
        servos.clear();
        loader.shutdown().await.unwrap();
        assert_eq!(loader.positions(), (90.0, 50.0));
        assert_eq!(servos.released(), vec![PLATE_1, PLATE_2, LID]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_failure_leaves_position() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        servos.fail(true);
        assert!(matches!(
            loader.open_lid(MoveStyle::Direct).await,
            Err(ActuatorError::Hardware(_))
        ));
        assert_eq!(loader.positions(), (90.0, 50.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_lift_failure_restores_first() {
        let servos = RecordingServos::new();
        let mut loader = create_loader(&servos).await;
        loader.open_lid(MoveStyle::Direct).await.unwrap();

        servos.fail_channel(Some(PLATE_2));
        assert!(matches!(
            loader.move_plate_to(30.0, MoveStyle::Direct).await,
            Err(ActuatorError::Hardware(_))
        ));
        assert_eq!(loader.positions(), (90.0, 0.0));
        assert_eq!(servos.angle(PLATE_1), Some(180.0));
        assert_eq!(servos.angle(PLATE_2), Some(0.0));
        assert_eq!(servos.commands_for(PLATE_1).last(), Some(&180.0));

        servos.fail_channel(None);
        loader.move_plate_to(30.0, MoveStyle::Direct).await.unwrap();
        assert_eq!(servos.angle(PLATE_1), Some(120.0));
        assert_eq!(servos.angle(PLATE_2), Some(60.0));
    }
}

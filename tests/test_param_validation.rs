use seqcrf::{token, Config, Error, Trainer, WeightPolicy};

#[test]
fn test_variance_validation() {
    let mut trainer = Trainer::new();
    assert!(matches!(
        trainer.set("variance", "-1.0"),
        Err(Error::InvalidParameter(_))
    ));
    assert!(trainer.set("variance", "0").is_err());
    assert!(trainer.set("variance", "2.5").is_ok());
    assert_eq!(trainer.config().variance(), 2.5);
}

#[test]
fn test_epsilon_validation() {
    let mut trainer = Trainer::new();
    assert!(trainer.set("epsilon", "-0.1").is_err());
    assert!(trainer.set("epsilon", "0").is_ok());
    assert!(trainer.set("delta", "-1").is_err());
    assert!(trainer.set("period", "0").is_ok());
}

#[test]
fn test_invalid_parameter_values() {
    let mut trainer = Trainer::new();
    assert!(trainer.set("iterations", "abc").is_err());
    assert!(trainer.set("iterations", "0").is_err());
    assert!(trainer.set("threads", "0").is_err());
    assert!(trainer.set("fully_connected", "maybe").is_err());
    assert!(trainer.set("orders", "1,1").is_err());
    assert!(trainer.set("orders", "x").is_err());
    assert!(trainer.set("linesearch", "Newton").is_err());
    assert!(trainer.set("cache_size", "0").is_err());
    assert!(trainer.set("n_best", "0").is_err());
}

#[test]
fn test_unknown_parameter() {
    let mut trainer = Trainer::new();
    assert!(matches!(
        trainer.set("c2", "1.0"),
        Err(Error::UnknownParameter(name)) if name == "c2"
    ));
}

#[test]
fn test_weight_policy_parsing() {
    let mut config = Config::default();
    assert_eq!(config.weight_policy(), WeightPolicy::SomeDense);
    config.set("weights", "sparse").unwrap();
    assert_eq!(config.weight_policy(), WeightPolicy::Sparse);
    assert!(matches!(config.set("weights", "lots"), Err(Error::Config(_))));
}

#[test]
fn test_bad_pattern() {
    let mut trainer = Trainer::new();
    assert!(matches!(
        trainer.set("forbidden", "O,(I"),
        Err(Error::Pattern { .. })
    ));
}

#[test]
fn test_induction_with_threads_fails_before_training() {
    let mut trainer = Trainer::new();
    trainer.set("feature_induction", "true").unwrap();
    trainer.set("threads", "2").unwrap();
    // rejected before the missing data is even noticed
    assert!(matches!(
        trainer.train(),
        Err(Error::InductionWithThreads { threads: 2 })
    ));

    trainer
        .append(&[token(["a"]), token(["b"])], &["O", "X"])
        .unwrap();
    assert!(matches!(
        trainer.train(),
        Err(Error::InductionWithThreads { threads: 2 })
    ));

    trainer.set("threads", "1").unwrap();
    assert!(trainer.train().is_ok());
}

#[test]
fn test_default_label_joins_alphabet() {
    let mut trainer = Trainer::new();
    trainer.append(&[token(["a"])], &["X"]).unwrap();
    trainer.set("default_label", "START").unwrap();
    // the new default label joins the alphabet, so the lattice still builds
    let trained = trainer.train().unwrap();
    assert!(trained.model.to_label_id("START").is_some());
}

#[test]
fn test_inadmissible_start() {
    let mut trainer = Trainer::new();
    trainer.set("forbidden", "O,.*").unwrap();
    trainer.append(&[token(["a"])], &["X"]).unwrap();
    assert!(matches!(trainer.train(), Err(Error::Config(_))));
}

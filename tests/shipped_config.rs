//! The files under `config/` must stay loadable by the service.

use branch_risk_clustering::columns::ColumnAliases;
use branch_risk_clustering::ClusterModel;

#[test]
fn shipped_calibration_matches_built_in_intercepts() {
    let model = ClusterModel::load("config/model.toml").expect("config/model.toml parses");
    assert_eq!(model, ClusterModel::default());
    assert_eq!(model.fingerprint(), ClusterModel::default().fingerprint());
}

#[test]
fn shipped_aliases_extend_the_dashboard_headers() {
    let text = std::fs::read_to_string("config/columns.toml").expect("read columns.toml");
    let aliases = ColumnAliases::from_toml_str(&text).expect("columns.toml parses");
    assert_eq!(aliases.resolve("Disbursed Capital"), Some("capital"));
    assert_eq!(aliases.resolve("Saldo Insoluto Vencido Actual"), Some("past_due_balance"));
    assert_eq!(aliases.resolve("región"), Some("region"));
}

#![allow(dead_code)]

use axum::Router;
use price_service::model::{ForestWriter, TreeNode};
use std::net::SocketAddr;
use std::path::Path;

/// Serves `router` on an ephemeral loopback port for the rest of the test.
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

/// Address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Three depth-two trees over the 18 house features. The scenario below
/// lands on 350k, 410k and 530k, so the mean is exactly 430k.
pub fn sample_forest() -> ForestWriter {
    ForestWriter::new(18)
        .tree(vec![
            TreeNode::split(2, 2000.0, 1, 4),
            TreeNode::split(8, 7.0, 2, 3),
            TreeNode::Leaf(350_000.0),
            TreeNode::Leaf(480_000.0),
            TreeNode::Leaf(720_000.0),
        ])
        .tree(vec![
            TreeNode::split(0, 2.5, 1, 2),
            TreeNode::Leaf(300_000.0),
            TreeNode::split(14, 47.55, 3, 4),
            TreeNode::Leaf(410_000.0),
            TreeNode::Leaf(560_000.0),
        ])
        .tree(vec![
            TreeNode::split(1, 1.5, 1, 2),
            TreeNode::Leaf(320_000.0),
            TreeNode::split(11, 1980.0, 3, 4),
            TreeNode::Leaf(450_000.0),
            TreeNode::Leaf(530_000.0),
        ])
}

pub const SCENARIO_PRICE: f64 = 430_000.0;

pub fn scenario_features() -> [f64; 18] {
    [3.0, 2.0, 1800.0, 5000.0, 1.0, 0.0, 0.0, 3.0, 7.0, 1800.0, 0.0, 1990.0, 0.0, 98001.0, 47.5, -122.2, 1800.0, 5000.0]
}

pub fn scenario_json() -> serde_json::Value {
    serde_json::json!({
        "bedrooms": 3, "bathrooms": 2, "sqft_living": 1800, "sqft_lot": 5000, "floors": 1,
        "waterfront": 0, "view": 0, "condition": 3, "grade": 7, "sqft_above": 1800,
        "sqft_basement": 0, "yr_built": 1990, "yr_renovated": 0, "zipcode": 98001,
        "lat": 47.5, "long": -122.2, "sqft_living15": 1800, "sqft_lot15": 5000
    })
}

pub fn staging_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|rd| rd.filter_map(Result::ok).filter(|e| e.file_name().to_string_lossy().ends_with(".part")).count())
        .unwrap_or(0)
}

//! # 费用计算服务
//!
//! 价格表按模型给出各 token 类别的单价（美元/百万 token），费用以
//! 微美元定点整数计算。每微美元/token 恰好等于每百万 token 一美元，
//! 因此类别费用 = token 数 × 单价，四舍五入到微美元。
//!
//! 未配置单价的模型费用为零并记录告警；价格表可整体原子换新。

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::error::Result;
use crate::logging::{LogComponent, LogStage};
use crate::lwarn;
use crate::statistics::types::TokenUsage;

/// 单个模型的类别单价（美元/百万 token）
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
    pub cache_create: f64,
    pub cache_read: f64,
}

/// 价格表：模型名 → 单价
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    models: HashMap<String, ModelPrice>,
}

impl PriceTable {
    /// 从 JSON 文本解析：`{"<model>": {"input": 3.0, "output": 15.0, ...}}`
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let models: HashMap<String, ModelPrice> = serde_json::from_str(raw)?;
        Ok(Self { models })
    }

    /// 从文件读取价格表
    pub fn from_file(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            lwarn!(
                "system",
                LogStage::Configuration,
                LogComponent::Pricing,
                "price_table_missing",
                "Price table file not found, all costs will be zero",
                path = %path,
            );
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    #[must_use]
    pub fn get(&self, model: &str) -> Option<&ModelPrice> {
        self.models.get(model)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// 费用分解（全部为微美元）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CostBreakdown {
    pub input_micros: u64,
    pub output_micros: u64,
    pub cache_create_micros: u64,
    pub cache_read_micros: u64,
    pub total_micros: u64,
}

impl CostBreakdown {
    /// `"$X.XXXXXX"` 格式化，固定 6 位小数
    #[must_use]
    pub fn formatted(&self) -> String {
        format_micros(self.total_micros)
    }
}

/// 微美元 → `"$X.XXXXXX"`
#[must_use]
pub fn format_micros(micros: u64) -> String {
    format!("${}.{:06}", micros / 1_000_000, micros % 1_000_000)
}

/// `"$X.XXXXXX"` → 微美元（测试与对账用）
#[must_use]
pub fn parse_formatted(raw: &str) -> Option<u64> {
    let raw = raw.strip_prefix('$')?;
    let (whole, frac) = raw.split_once('.')?;
    if frac.len() != 6 {
        return None;
    }
    let whole: u64 = whole.parse().ok()?;
    let frac: u64 = frac.parse().ok()?;
    whole.checked_mul(1_000_000)?.checked_add(frac)
}

/// 费用计算服务
///
/// 表指针读多写少，重载时整体换新。
pub struct PricingService {
    table: RwLock<Arc<PriceTable>>,
}

impl PricingService {
    #[must_use]
    pub fn new(table: PriceTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// 当前表快照
    #[must_use]
    pub fn snapshot(&self) -> Arc<PriceTable> {
        self.table.read().unwrap().clone()
    }

    /// 原子换新价格表
    pub fn swap(&self, table: PriceTable) {
        *self.table.write().unwrap() = Arc::new(table);
    }

    /// 从文件重载价格表
    pub fn reload_from_file(&self, path: &str) -> Result<()> {
        let table = PriceTable::from_file(path)?;
        self.swap(table);
        Ok(())
    }

    /// 计算一次请求的费用分解
    ///
    /// 纯函数语义：同样的输入总是产生同样的输出，无副作用
    /// （未知模型的告警日志除外）。
    #[must_use]
    pub fn calculate(
        &self,
        request_id: &str,
        model: Option<&str>,
        tokens: &TokenUsage,
    ) -> CostBreakdown {
        let Some(model) = model else {
            return CostBreakdown::default();
        };
        let table = self.snapshot();
        let Some(price) = table.get(model) else {
            lwarn!(
                request_id,
                LogStage::Accounting,
                LogComponent::Pricing,
                "unknown_model_price",
                "No price configured for model, cost recorded as zero",
                model = %model,
            );
            return CostBreakdown::default();
        };

        let input_micros = category_micros(tokens.input_tokens, price.input);
        let output_micros = category_micros(tokens.output_tokens, price.output);
        let cache_create_micros = category_micros(tokens.cache_create_tokens, price.cache_create);
        let cache_read_micros = category_micros(tokens.cache_read_tokens, price.cache_read);

        CostBreakdown {
            input_micros,
            output_micros,
            cache_create_micros,
            cache_read_micros,
            total_micros: input_micros
                + output_micros
                + cache_create_micros
                + cache_read_micros,
        }
    }
}

/// 类别费用：token 数 × 美元每百万 token = 微美元，四舍五入
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn category_micros(tokens: u64, usd_per_million: f64) -> u64 {
    if usd_per_million <= 0.0 {
        return 0;
    }
    (tokens as f64 * usd_per_million).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PriceTable {
        PriceTable::from_json_str(
            r#"{
                "claude-3-5-sonnet-20241022": {
                    "input": 3.0,
                    "output": 15.0,
                    "cache_create": 3.75,
                    "cache_read": 0.3
                },
                "gpt-4o-mini": { "input": 0.15, "output": 0.6 }
            }"#,
        )
        .unwrap()
    }

    fn usage(input: u64, output: u64, cache_create: u64, cache_read: u64) -> TokenUsage {
        TokenUsage {
            input_tokens: input,
            output_tokens: output,
            cache_create_tokens: cache_create,
            cache_read_tokens: cache_read,
        }
    }

    #[test]
    fn test_category_costs_and_total() {
        let service = PricingService::new(table());
        let cost = service.calculate(
            "req-1",
            Some("claude-3-5-sonnet-20241022"),
            &usage(1000, 500, 200, 4000),
        );

        // 1000×3.0 + 500×15.0 + 200×3.75 + 4000×0.3 微美元
        assert_eq!(cost.input_micros, 3_000);
        assert_eq!(cost.output_micros, 7_500);
        assert_eq!(cost.cache_create_micros, 750);
        assert_eq!(cost.cache_read_micros, 1_200);
        assert_eq!(cost.total_micros, 12_450);
        assert_eq!(cost.formatted(), "$0.012450");
    }

    #[test]
    fn test_unknown_model_is_free() {
        let service = PricingService::new(table());
        let cost = service.calculate("req-2", Some("mystery-model"), &usage(1000, 1000, 0, 0));
        assert_eq!(cost.total_micros, 0);
        assert_eq!(cost.formatted(), "$0.000000");
    }

    #[test]
    fn test_missing_model_name_is_free() {
        let service = PricingService::new(table());
        let cost = service.calculate("req-3", None, &usage(1000, 1000, 0, 0));
        assert_eq!(cost, CostBreakdown::default());
    }

    #[test]
    fn test_format_parse_roundtrip() {
        for micros in [0_u64, 1, 999_999, 1_000_000, 12_450, 987_654_321] {
            let formatted = format_micros(micros);
            assert_eq!(parse_formatted(&formatted), Some(micros), "{formatted}");
        }
        assert_eq!(parse_formatted("$1.23"), None); // 小数位数不对
        assert_eq!(parse_formatted("1.234567"), None); // 缺美元符号
    }

    #[test]
    fn test_swap_replaces_table() {
        let service = PricingService::new(table());
        assert_eq!(service.snapshot().len(), 2);

        service.swap(PriceTable::default());
        assert!(service.snapshot().is_empty());
        let cost = service.calculate(
            "req-4",
            Some("claude-3-5-sonnet-20241022"),
            &usage(100, 0, 0, 0),
        );
        assert_eq!(cost.total_micros, 0);
    }
}

// ==========================================
// 堆场客户池分配引擎 - 箱位占用回填
// ==========================================
// 输入: 集装箱库存（位置文本）
// 输出: 每个物理箱位的绝对占用计数（一次性写入），随后重算启用池的占用
// 规则: 虚拟箱位上的位置同时计入两个配对成员
// 红线: 无法识别的位置只计数并报告，不猜测归属
// ==========================================

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::domain::location::LocationId;
use crate::domain::types::ContainerSize;
use crate::domain::stack::Stack;
use crate::engine::{pairing, CapacityCalculator};
use crate::importer::error::{ImportError, ImportResult};
use crate::repository::{AllocationStore, StackTopology};

/// 报告中保留的异常位置样本上限
const MALFORMED_SAMPLE_LIMIT: usize = 50;

// ==========================================
// 库存数据源
// ==========================================

/// 库存中的一条集装箱记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub container_id: String,
    pub yard_id: String,
    pub container_size: Option<ContainerSize>,
    /// 位置文本（可能带前后缀或小写）
    pub location: String,
}

/// 集装箱库存数据源
#[async_trait]
pub trait ContainerInventorySource: Send + Sync {
    async fn fetch_containers(&self, yard_id: &str) -> ImportResult<Vec<ContainerRecord>>;
}

/// CSV 库存文件
///
/// 必需列: container_id, yard_id, location；可选列: size
pub struct CsvContainerInventory {
    path: PathBuf,
}

impl CsvContainerInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(content: &str) -> ImportResult<Vec<ContainerRecord>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
        let column = |name: &str| -> ImportResult<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| ImportError::MissingColumn(name.to_string()))
        };
        let id_col = column("container_id")?;
        let yard_col = column("yard_id")?;
        let location_col = column("location")?;
        let size_col = headers.iter().position(|h| h == "size");

        let mut records = Vec::new();
        for result in reader.records() {
            let row = result?;
            if row.iter().all(|v| v.is_empty()) {
                continue;
            }
            records.push(ContainerRecord {
                container_id: row.get(id_col).unwrap_or_default().to_string(),
                yard_id: row.get(yard_col).unwrap_or_default().to_string(),
                container_size: size_col
                    .and_then(|c| row.get(c))
                    .and_then(ContainerSize::parse),
                location: row.get(location_col).unwrap_or_default().to_string(),
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl ContainerInventorySource for CsvContainerInventory {
    async fn fetch_containers(&self, yard_id: &str) -> ImportResult<Vec<ContainerRecord>> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut records = Self::parse(&content)?;
        records.retain(|r| r.yard_id == yard_id);
        Ok(records)
    }
}

// ==========================================
// 回填报告
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub yard_id: String,
    pub total_records: usize,
    /// 成功识别位置的集装箱数
    pub counted_records: usize,
    pub malformed_count: usize,
    /// 异常位置样本（container_id, location）
    pub malformed_samples: Vec<(String, String)>,
    /// 位置指向的箱位在拓扑中不存在
    pub unknown_stack_numbers: Vec<i32>,
    /// 写入后的占用（stack_id → occupancy）
    pub occupancy: BTreeMap<String, i32>,
    /// 重算后的池占用（pool_id → occupancy）
    pub pool_occupancy: BTreeMap<String, i32>,
}

// ==========================================
// OccupancyBackfill
// ==========================================
pub struct OccupancyBackfill {
    topology: Arc<dyn StackTopology>,
    store: Arc<dyn AllocationStore>,
    calculator: CapacityCalculator,
}

impl OccupancyBackfill {
    pub fn new(topology: Arc<dyn StackTopology>, store: Arc<dyn AllocationStore>) -> Self {
        Self {
            topology,
            store,
            calculator: CapacityCalculator::new(),
        }
    }

    /// 执行回填
    ///
    /// 堆场内每个物理箱位都会被写入（没有集装箱的写 0）
    #[instrument(skip(self, source))]
    pub async fn run(
        &self,
        source: &dyn ContainerInventorySource,
        yard_id: &str,
    ) -> ImportResult<BackfillReport> {
        let records = source.fetch_containers(yard_id).await?;
        let mut report = BackfillReport {
            yard_id: yard_id.to_string(),
            total_records: records.len(),
            ..Default::default()
        };

        let mut counts: HashMap<i32, i32> = HashMap::new();
        for record in &records {
            let Some(location) = LocationId::extract(&record.location) else {
                report.malformed_count += 1;
                if report.malformed_samples.len() < MALFORMED_SAMPLE_LIMIT {
                    report
                        .malformed_samples
                        .push((record.container_id.clone(), record.location.clone()));
                }
                continue;
            };

            let members = match pairing::pair_for_virtual(location.stack_number) {
                Some((a, b)) => vec![a, b],
                None => vec![location.stack_number],
            };
            for number in members {
                *counts.entry(number).or_insert(0) += 1;
            }
            report.counted_records += 1;
        }

        let stacks = self.topology.list_stacks(Some(yard_id))?;
        let known: BTreeSet<i32> = stacks.iter().map(|s| s.stack_number).collect();
        report.unknown_stack_numbers = counts
            .keys()
            .filter(|n| !known.contains(n))
            .copied()
            .collect::<BTreeSet<i32>>()
            .into_iter()
            .collect();

        let mut refreshed: HashMap<String, Stack> = HashMap::new();
        for stack in stacks.iter().filter(|s| !s.is_virtual_identity()) {
            let occupancy = counts.get(&stack.stack_number).copied().unwrap_or(0);
            self.topology.backfill_occupancy(&stack.id, occupancy)?;
            report.occupancy.insert(stack.id.clone(), occupancy);
            refreshed.insert(
                stack.id.clone(),
                Stack {
                    current_occupancy: occupancy,
                    ..stack.clone()
                },
            );
        }

        report.pool_occupancy = self.recompute_pools(yard_id, &refreshed)?;

        if report.malformed_count > 0 {
            tracing::warn!(
                yard_id,
                malformed = report.malformed_count,
                "部分集装箱位置无法识别，未计入占用"
            );
        }
        if !report.unknown_stack_numbers.is_empty() {
            tracing::warn!(
                yard_id,
                unknown = ?report.unknown_stack_numbers,
                "位置指向的箱位不存在"
            );
        }
        tracing::info!(
            yard_id,
            total = report.total_records,
            counted = report.counted_records,
            stacks = report.occupancy.len(),
            pools = report.pool_occupancy.len(),
            "箱位占用回填完成"
        );
        Ok(report)
    }

    /// 按独占台账重算启用池的占用，配对成员只计一次
    fn recompute_pools(
        &self,
        yard_id: &str,
        stacks: &HashMap<String, Stack>,
    ) -> ImportResult<BTreeMap<String, i32>> {
        let mut result = BTreeMap::new();
        for pool in self.store.list_pools(Some(yard_id))? {
            if !pool.is_active {
                continue;
            }
            let held: Vec<Stack> = self
                .store
                .find_assignments_by_pool(&pool.id)?
                .into_iter()
                .filter(|a| a.is_exclusive)
                .filter_map(|a| stacks.get(&a.stack_id).cloned())
                .collect();
            let occupancy = self.calculator.effective_occupancy(&held);
            if occupancy != pool.current_occupancy {
                tracing::debug!(
                    pool_id = %pool.id,
                    before = pool.current_occupancy,
                    after = occupancy,
                    "池占用已按回填结果校正"
                );
            }
            self.store.set_pool_occupancy(&pool.id, occupancy)?;
            result.insert(pool.id.clone(), occupancy);
        }
        Ok(result)
    }
}

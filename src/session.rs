//! One explorer session: source registry, record cache, describer and the
//! interaction controller, plus the details panel they feed.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::controller::{DescribeRequest, Gates, InteractionController};
use crate::describe::{Composite, Describer};
use crate::export::{self, ExportError, ExportSummary, Precondition};
use crate::records::{CacheStats, RecordCache, RecordFetcher};
use crate::sources::SourceRegistry;
use crate::surface::{MapSurface, ScreenPoint};

pub struct Session<F> {
    registry: Arc<SourceRegistry>,
    cache: Arc<RecordCache<F>>,
    describer: Describer<F>,
    controller: InteractionController,
    export_dir: PathBuf,
    panel: Option<Composite>,
}

impl<F: RecordFetcher> Session<F> {
    pub fn new(registry: SourceRegistry, fetcher: F, gates: Gates, export_dir: impl Into<PathBuf>) -> Self {
        let registry = Arc::new(registry);
        let cache = Arc::new(RecordCache::new(fetcher));
        Self {
            describer: Describer::new(Arc::clone(&registry), Arc::clone(&cache)),
            controller: InteractionController::new(Arc::clone(&registry), gates),
            registry,
            cache,
            export_dir: export_dir.into(),
            panel: None,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn controller(&self) -> &InteractionController {
        &self.controller
    }

    /// Handle to the describer for spawned tasks
    pub fn describer(&self) -> Describer<F> {
        self.describer.clone()
    }

    pub fn cache(&self) -> Arc<RecordCache<F>> {
        Arc::clone(&self.cache)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Latest settled description
    pub fn panel(&self) -> Option<&Composite> {
        self.panel.as_ref()
    }

    pub fn pointer_moved<S: MapSurface + ?Sized>(
        &mut self,
        surface: &mut S,
        point: ScreenPoint,
    ) -> Option<DescribeRequest> {
        self.controller.on_pointer_move(surface, point)
    }

    pub fn clicked<S: MapSurface + ?Sized>(&mut self, surface: &mut S, point: ScreenPoint) -> DescribeRequest {
        self.controller.on_click(surface, point)
    }

    pub fn escape(&mut self) {
        self.controller.on_escape();
    }

    /// Store a finished description unless a newer one was requested since.
    pub fn settle(&mut self, seq: u64, composite: Composite) -> bool {
        match self.controller.settle(seq, composite) {
            Some(composite) => {
                self.panel = Some(composite);
                true
            }
            None => false,
        }
    }

    /// Click, then wait for the description in place.
    pub async fn handle_click<S: MapSurface + ?Sized>(&mut self, surface: &mut S, point: ScreenPoint) -> Option<&Composite> {
        let request = self.clicked(surface, point);
        let composite = self.describer.describe_all(&request.grouped).await;
        self.settle(request.seq, composite);
        self.panel()
    }

    /// Check the export gates now and return the enrich-and-save work, which
    /// owns everything it needs and can run as a detached task.
    pub fn start_export<S: MapSurface + ?Sized>(
        &self,
        surface: &S,
    ) -> Result<impl Future<Output = Result<ExportSummary, ExportError>> + 'static, Precondition>
    where
        F: 'static,
    {
        let grouped = export::prepare(surface, &self.registry, self.controller.gates().min_export_zoom)?;
        let registry = Arc::clone(&self.registry);
        let cache = Arc::clone(&self.cache);
        let dir = self.export_dir.clone();
        Ok(async move {
            let tables = export::build_tables(&registry, &cache, &grouped).await;
            export::save_archive(&dir, &tables)
        })
    }

    /// Export everything in view to `{export_dir}/map_csv_export.zip`.
    pub async fn export<S: MapSurface + ?Sized>(&self, surface: &S) -> Result<ExportSummary, ExportError>
    where
        F: 'static,
    {
        self.start_export(surface)?.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_feature;
    use crate::records::fake::FakeFetcher;
    use crate::surface::recording::RecordingSurface;
    use serde_json::json;

    const AT: ScreenPoint = ScreenPoint { col: 10, row: 5 };

    fn session(fetcher: FakeFetcher) -> Session<FakeFetcher> {
        Session::new(SourceRegistry::standard(), fetcher, Gates::default(), ".")
    }

    fn surface_over_everything() -> RecordingSurface {
        let mut surface = RecordingSurface::new(9.0);
        // Hit-test order deliberately differs from the panel layout
        surface.features = vec![
            test_feature("public_schools", 40, json!({"NCESID": "360007"})),
            test_feature("school_districts", 30, json!({"GEOID": "3600001"})),
            test_feature("tracts", 20, json!({"GEOID": "36001000100", "svi_rank": 0.4})),
            test_feature("con_districts", 10, json!({"GEOID": "3620"})),
        ];
        surface
    }

    #[tokio::test]
    async fn test_click_focuses_once_and_lays_out_panel() {
        let fetcher = FakeFetcher::default()
            .with("tracts", "36001000100", json!({"population": 4100}))
            .with("school_districts", "3600001", json!({"NAME": "Albany City"}))
            .with("public_schools", "360007", json!({"NAME": "Lincoln Elementary"}));
        let mut session = session(fetcher);
        let mut surface = surface_over_everything();

        let panel = session.handle_click(&mut surface, AT).await.unwrap().clone();

        assert_eq!(session.controller().focus().cycles(), 1);
        assert_eq!(surface.calls.iter().filter(|(_, _, focus)| *focus).count(), 4);
        assert_eq!(
            panel.sources(),
            vec!["con_districts", "tracts", "school_districts", "public_schools"]
        );
        let html = panel.to_html();
        assert!(html.find("<h3>con_districts</h3>") < html.find("<h3>tracts</h3>"));
        assert!(html.contains("Lincoln Elementary"));
        assert_eq!(session.cache_stats().fetches, 3);
    }

    #[tokio::test]
    async fn test_superseded_description_not_shown() {
        let mut session = session(FakeFetcher::default());
        let mut surface = surface_over_everything();

        let slow = session.clicked(&mut surface, AT);
        surface.features.truncate(1);
        let fast = session.clicked(&mut surface, AT);

        let describer = session.describer();
        let fast_composite = describer.describe_all(&fast.grouped).await;
        assert!(session.settle(fast.seq, fast_composite));
        let slow_composite = describer.describe_all(&slow.grouped).await;
        assert!(!session.settle(slow.seq, slow_composite));

        assert_eq!(session.panel().unwrap().sources(), vec!["public_schools"]);
    }

    #[tokio::test]
    async fn test_export_uses_session_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = session(FakeFetcher::default());
        session.export_dir = dir.path().to_path_buf();

        let summary = session.export(&surface_over_everything()).await.unwrap();
        assert_eq!(summary.rows.len(), 4);
        assert!(dir.path().join(export::ARCHIVE_NAME).exists());
    }
}

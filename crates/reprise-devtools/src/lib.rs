use std::fmt::Write as _;
use std::time::Duration;

use web_time::Instant;

use reprise_core::{NodeId, PassStats, RenderError, Runtime};

pub struct Hud {
    pub enabled: bool,
    pass_count: u64,
    pass_ms_smooth: f32,
    pub metrics: Option<Metrics>,
}

impl Default for Hud {
    fn default() -> Self {
        Self::new()
    }
}

impl Hud {
    pub fn new() -> Self {
        Self {
            enabled: false,
            pass_count: 0,
            pass_ms_smooth: 0.0,
            metrics: None,
        }
    }

    pub fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    /// Folds one committed pass into the counters.
    pub fn record(&mut self, elapsed: Duration, stats: PassStats, instances: usize) {
        self.pass_count += 1;
        let ms = elapsed.as_secs_f32() * 1000.0;
        // simple EMA
        let a = 0.2;
        self.pass_ms_smooth = if self.pass_count == 1 {
            ms
        } else {
            (1.0 - a) * self.pass_ms_smooth + a * ms
        };
        self.metrics = Some(Metrics {
            pass_ms: ms,
            stats,
            instances,
        });
    }

    pub fn pass_count(&self) -> u64 {
        self.pass_count
    }

    pub fn pass_ms(&self) -> f32 {
        self.pass_ms_smooth
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("pass: {}", self.pass_count),
            format!("avg: {:.2} ms", self.pass_ms_smooth),
        ];
        if let Some(m) = &self.metrics {
            let s = &m.stats;
            lines.push(format!(
                "+{} ~{} ={} -{}",
                s.mounted, s.updated, s.memoized, s.unmounted
            ));
            lines.push(format!(
                "effects: {} cleanups: {} errors: {}",
                s.effects_run, s.cleanups_run, s.effect_errors
            ));
            lines.push(format!("instances: {}", m.instances));
        }
        lines.join("  |  ")
    }
}

#[derive(Clone, Debug, Default)]
pub struct Metrics {
    pub pass_ms: f32,
    pub stats: PassStats,
    pub instances: usize,
}

pub struct Inspector {
    pub hud: Hud,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inspector {
    pub fn new() -> Self {
        Self { hud: Hud::new() }
    }

    /// Runs `pass` against `rt` and records it if it committed.
    pub fn time_pass<R>(
        &mut self,
        rt: &mut Runtime,
        pass: impl FnOnce(&mut Runtime) -> Result<R, RenderError>,
    ) -> Result<R, RenderError> {
        let start = Instant::now();
        let out = pass(rt);
        match &out {
            Ok(_) => {
                self.hud
                    .record(start.elapsed(), rt.last_pass(), rt.instance_count());
                if self.hud.enabled {
                    log::info!("{}", self.hud.summary());
                }
            }
            Err(err) => log::debug!("inspector: pass failed: {err}"),
        }
        out
    }

    /// Outline of the instances under `root`, one per line:
    /// `name#key (hooks=n, renders=m)`, indented by nesting depth.
    pub fn dump_tree(&self, rt: &Runtime, root: NodeId) -> String {
        let mut out = String::new();
        for (depth, info) in rt.instances_under(root) {
            let _ = write!(out, "{:indent$}{}", "", info.name, indent = depth * 2);
            if let Some(key) = &info.key {
                let _ = write!(out, "#{key}");
            }
            let _ = writeln!(out, " (hooks={}, renders={})", info.hooks, info.renders);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reprise_core::{Patcher, create_component, use_effect_once, use_ref};

    #[test]
    fn test_hud_smooths_pass_time() {
        let mut hud = Hud::new();
        hud.record(Duration::from_millis(10), PassStats::default(), 0);
        assert_eq!(hud.pass_count(), 1);
        assert!((hud.pass_ms() - 10.0).abs() < 0.01);

        hud.record(Duration::from_millis(20), PassStats::default(), 0);
        assert!((hud.pass_ms() - 12.0).abs() < 0.01);
        assert!(hud.summary().starts_with("pass: 2  |  avg: 12.00 ms"));
    }

    #[test]
    fn test_inspector_records_and_dumps_tree() {
        let leaf = create_component(
            |n: &u32| {
                use_ref(|| 0u8)?;
                use_effect_once(|| ())?;
                Ok(*n)
            },
            |n: &u32, out: &mut Patcher<'_>| {
                out.element_open("li", None);
                out.text(&n.to_string());
                out.element_close();
                Ok(())
            },
        )
        .named("Leaf");
        let list = create_component(
            |n: &u32| Ok(*n),
            move |n: &u32, out: &mut Patcher<'_>| {
                out.element_open("ul", None);
                for i in 0..*n {
                    out.component(&leaf, i.to_string(), i)?;
                }
                out.element_close();
                Ok(())
            },
        )
        .named("List");

        let mut rt = Runtime::new();
        let root = rt.tree_mut().create_element("ul");
        let mut inspector = Inspector::new();
        inspector
            .time_pass(&mut rt, |rt| rt.render(root, &list, 2))
            .unwrap();
        assert_eq!(inspector.hud.pass_count(), 1);
        let metrics = inspector.hud.metrics.clone().unwrap();
        assert_eq!(metrics.stats.mounted, 3);
        assert_eq!(metrics.instances, 3);

        assert_eq!(
            inspector.dump_tree(&rt, root),
            "List (hooks=0, renders=1)\n  Leaf#0 (hooks=2, renders=1)\n  Leaf#1 (hooks=2, renders=1)\n"
        );

        let failed = inspector.time_pass(&mut rt, |rt| {
            rt.patch_outer(root, |out| {
                out.element_close();
                Ok(())
            })
        });
        assert!(failed.is_err());
        assert_eq!(inspector.hud.pass_count(), 1);
    }
}

//! ライフサイクルガードのテスト
//!
//! プロセス全体の状態を使うため、このファイルのテストは1つにまとめています。

use mojoprobe_target::sim::SimHost;
use mojoprobe_target::{Backend, LifecycleGuard, Result, SimBackend};
use std::cell::Cell;
use std::rc::Rc;

/// プロセス全体で一度だけ初期化できるバックエンド
struct ProcessWideBackend {
    inner: SimBackend,
    terminated: Rc<Cell<usize>>,
}

impl Backend for ProcessWideBackend {
    type Host = SimHost;

    const PROCESS_WIDE: bool = true;

    fn initialize(&mut self) -> Result<()> {
        self.inner.initialize()
    }

    fn create_host(&mut self) -> Result<SimHost> {
        self.inner.create_host()
    }

    fn destroy_host(&mut self, host: SimHost) {
        self.inner.destroy_host(host)
    }

    fn terminate(&mut self) {
        self.terminated.set(self.terminated.get() + 1);
        self.inner.terminate()
    }
}

fn backend(terminated: &Rc<Cell<usize>>) -> ProcessWideBackend {
    ProcessWideBackend {
        inner: SimBackend::default(),
        terminated: Rc::clone(terminated),
    }
}

#[test]
fn test_process_wide_init_once_terminate_once() {
    let terminated = Rc::new(Cell::new(0));

    let mut first = LifecycleGuard::acquire(backend(&terminated)).expect("first acquisition");

    // 初期化中の2回目の取得は失敗する
    let second = LifecycleGuard::acquire(backend(&terminated));
    assert!(second.is_err());
    assert_eq!(terminated.get(), 0);

    // release は何度呼んでも1回だけ terminate する
    first.release();
    first.release();
    assert!(first.is_terminated());
    drop(first);
    assert_eq!(terminated.get(), 1);

    // 終了後は再び取得できる
    let third = LifecycleGuard::acquire(backend(&terminated)).expect("reacquire after terminate");
    drop(third);
    assert_eq!(terminated.get(), 2);
}

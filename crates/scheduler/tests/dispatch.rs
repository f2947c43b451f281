use butterpaper_scheduler::{
    AsyncCompletion, IdleQueue, ImmediateIdle, Job, JobExecutor, JobHandle, JobId, JobKind,
    JobMode, JobPriority, JobScheduler, JobState, JobType, SchedulerConfig,
};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("butterpaper_scheduler=debug")
        .try_init();
}

fn headless() -> SchedulerConfig {
    SchedulerConfig::default().with_notify_on_owner(false)
}

fn render(page_index: u32) -> JobType {
    JobType::Render {
        page_index,
        zoom_level: 100,
        rotation: 0,
    }
}

fn thumbnail(page_index: u32) -> JobType {
    JobType::Thumbnail {
        page_index,
        width: 128,
        height: 180,
        rotation: 0,
    }
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::yield_now();
    }
}

/// Executor that records the order jobs ran in, and blocks on Load jobs
/// until the returned sender releases it.
fn recording_executor() -> (JobExecutor, Arc<Mutex<Vec<JobId>>>, mpsc::Sender<()>) {
    let order = Arc::new(Mutex::new(Vec::new()));
    let order_clone = order.clone();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let gate_rx = Mutex::new(gate_rx);

    let executor: JobExecutor = Arc::new(move |job: &mut Job| {
        if job.kind() == JobKind::Load {
            let _ = gate_rx.lock().unwrap().recv();
            return;
        }
        order_clone.lock().unwrap().push(job.id());
    });
    (executor, order, gate_tx)
}

/// Queue a Load job and wait until the worker is stuck executing it.
fn occupy_worker(scheduler: &JobScheduler) -> JobHandle {
    let gate = scheduler.add(
        Job::new(JobType::Load {
            path: "gate.pdf".into(),
        }),
        JobPriority::Low,
    );
    wait_until("gate job to start", || gate.state() == JobState::Running);
    gate
}

#[test]
fn test_mixed_producers_pop_in_static_order() {
    init_tracing();
    let (executor, order, gate_tx) = recording_executor();
    let scheduler = JobScheduler::with_config(headless(), executor, Arc::new(ImmediateIdle)).unwrap();
    let gate = occupy_worker(&scheduler);

    let jobs = vec![
        (Job::new(thumbnail(1)), JobPriority::Low),  // T1
        (Job::new(render(1)), JobPriority::High),    // R1
        (Job::new(thumbnail(2)), JobPriority::High), // T2
        (
            Job::new(JobType::Print {
                first_page: 0,
                last_page: 4,
            }),
            JobPriority::Low,
        ), // P1
    ];
    let ids: Vec<JobId> = jobs.iter().map(|(job, _)| job.id()).collect();
    let (t1, r1, t2, p1) = (ids[0], ids[1], ids[2], ids[3]);

    let barrier = Arc::new(Barrier::new(jobs.len()));
    let producers: Vec<_> = jobs
        .into_iter()
        .map(|(job, priority)| {
            let queue = scheduler.sync_queue();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                queue.add(job, priority)
            })
        })
        .collect();
    let handles: Vec<JobHandle> = producers.into_iter().map(|p| p.join().unwrap()).collect();

    gate_tx.send(()).unwrap();
    wait_until("all jobs to finish", || handles.iter().all(JobHandle::is_finished));
    assert!(gate.is_finished());

    assert_eq!(*order.lock().unwrap(), vec![r1, t2, t1, p1]);
}

#[test]
fn test_fifo_within_class() {
    let (executor, order, gate_tx) = recording_executor();
    let scheduler = JobScheduler::with_config(headless(), executor, Arc::new(ImmediateIdle)).unwrap();
    occupy_worker(&scheduler);

    let handles: Vec<JobHandle> = (0..3)
        .map(|page| scheduler.add(Job::new(render(page)), JobPriority::Low))
        .collect();
    let ids: Vec<JobId> = handles.iter().map(JobHandle::id).collect();

    gate_tx.send(()).unwrap();
    wait_until("jobs to finish", || handles.iter().all(JobHandle::is_finished));

    assert_eq!(*order.lock().unwrap(), ids);
}

#[test]
fn test_each_job_runs_exactly_once() {
    const PRODUCERS: usize = 4;
    const JOBS_PER_PRODUCER: u32 = 50;

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let runs: Arc<Mutex<HashMap<JobId, usize>>> = Arc::new(Mutex::new(HashMap::new()));

    let executor: JobExecutor = {
        let in_flight = in_flight.clone();
        let max_in_flight = max_in_flight.clone();
        let runs = runs.clone();
        Arc::new(move |job: &mut Job| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            assert_eq!(job.state(), JobState::Running);
            *runs.lock().unwrap().entry(job.id()).or_insert(0) += 1;
            in_flight.fetch_sub(1, Ordering::SeqCst);
        })
    };

    let scheduler = JobScheduler::with_config(headless(), executor, Arc::new(ImmediateIdle)).unwrap();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = scheduler.sync_queue();
            thread::spawn(move || {
                (0..JOBS_PER_PRODUCER)
                    .map(|page| {
                        let job_type = if (page as usize + producer) % 2 == 0 {
                            render(page)
                        } else {
                            thumbnail(page)
                        };
                        let priority = if page % 3 == 0 {
                            JobPriority::High
                        } else {
                            JobPriority::Low
                        };
                        queue.add(Job::new(job_type), priority)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let handles: Vec<JobHandle> = producers
        .into_iter()
        .flat_map(|p| p.join().unwrap())
        .collect();

    wait_until("all jobs to finish", || handles.iter().all(JobHandle::is_finished));

    let runs = runs.lock().unwrap();
    assert_eq!(runs.len(), handles.len());
    assert!(runs.values().all(|&count| count == 1));
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);

    let stats = scheduler.stats();
    assert_eq!(stats.jobs_submitted, handles.len() as u64);
    assert_eq!(stats.jobs_completed, handles.len() as u64);
}

#[test]
fn test_priority_update_races_with_worker() {
    let ran_with: Arc<Mutex<HashMap<JobId, JobPriority>>> = Arc::new(Mutex::new(HashMap::new()));
    let executor: JobExecutor = {
        let ran_with = ran_with.clone();
        Arc::new(move |job: &mut Job| {
            let previous = ran_with.lock().unwrap().insert(job.id(), job.priority());
            assert!(previous.is_none(), "job {} ran twice", job.id());
            thread::sleep(Duration::from_micros(50));
        })
    };

    let scheduler = JobScheduler::with_config(headless(), executor, Arc::new(ImmediateIdle)).unwrap();
    let handles: Vec<JobHandle> = (0..100)
        .map(|page| scheduler.add(Job::new(thumbnail(page)), JobPriority::Low))
        .collect();

    // Promote from another thread while the worker drains the queue
    let queue = scheduler.sync_queue();
    let promoter_handles = handles.clone();
    let promoted: Vec<(JobId, bool)> = thread::spawn(move || {
        promoter_handles
            .iter()
            .rev()
            .map(|handle| (handle.id(), queue.update_priority(handle, JobPriority::High)))
            .collect()
    })
    .join()
    .unwrap();

    wait_until("all jobs to finish", || handles.iter().all(JobHandle::is_finished));

    let ran_with = ran_with.lock().unwrap();
    assert_eq!(ran_with.len(), handles.len());
    for (id, moved) in promoted {
        if moved {
            // A successful move always takes effect before the job runs
            assert_eq!(ran_with[&id], JobPriority::High);
        } else {
            // Already popped: the move did not resurrect it
            assert_eq!(ran_with[&id], JobPriority::Low);
        }
    }

    // Updating a finished job reports failure
    assert!(!scheduler.update_priority(&handles[0], JobPriority::High));
    assert!(!scheduler.remove(&handles[0]));
}

#[test]
fn test_idle_worker_wakes_on_add() {
    let idle = IdleQueue::new();
    let executor: JobExecutor = Arc::new(|job: &mut Job| job.set_output(job.id()));
    let scheduler = JobScheduler::new(executor, Arc::new(idle.sender())).unwrap();

    // Let the worker go to sleep on an empty queue
    thread::sleep(Duration::from_millis(50));
    assert!(!idle.run_one_timeout(Duration::from_millis(10)));

    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    let handle = scheduler.add(
        Job::new(JobType::Links).on_finished(move |mut job| {
            tx.send(job.take_output::<JobId>()).unwrap();
        }),
        JobPriority::Low,
    );

    assert!(idle.run_one_timeout(Duration::from_secs(5)));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(rx.try_recv().unwrap(), Some(handle.id()));
    assert!(handle.is_finished());
}

#[test]
fn test_hook_on_owner_resubmits_job() {
    let idle = IdleQueue::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let executor: JobExecutor = {
        let runs = runs.clone();
        Arc::new(move |_job: &mut Job| {
            runs.fetch_add(1, Ordering::SeqCst);
        })
    };
    let scheduler = JobScheduler::new(executor, Arc::new(idle.sender())).unwrap();

    // Retry once from the owning thread, as a caller would after a failed load
    let producer = scheduler.sync_queue();
    let job = Job::new(JobType::Load {
        path: "retry.pdf".into(),
    })
    .on_finished(move |job| {
        producer.add(job, JobPriority::Low);
    });
    let handle = scheduler.add(job, JobPriority::Low);

    assert!(idle.run_one_timeout(Duration::from_secs(5)));
    assert_ne!(handle.state(), JobState::Finished);

    assert!(idle.run_one_timeout(Duration::from_secs(5)));
    assert!(handle.is_finished());
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    // The worker keeps serving later jobs
    let next = scheduler.add(Job::new(JobType::Fonts), JobPriority::Low);
    assert!(idle.run_one_timeout(Duration::from_secs(5)));
    assert!(next.is_finished());
}

#[test]
fn test_async_jobs_serialized_on_owner() {
    init_tracing();

    // Backend events that will complete the async renders later
    let events: Rc<RefCell<VecDeque<AsyncCompletion>>> = Rc::new(RefCell::new(VecDeque::new()));
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let owner = thread::current().id();

    let executor = {
        let events = events.clone();
        let log = log.clone();
        Rc::new(move |completion: AsyncCompletion| {
            assert_eq!(thread::current().id(), owner);
            log.borrow_mut().push(format!("start {}", completion.job().id()));
            events.borrow_mut().push_back(completion);
        })
    };

    let scheduler = JobScheduler::new(Arc::new(|_job: &mut Job| {}), Arc::new(ImmediateIdle))
        .unwrap()
        .with_async_executor(executor);

    let async_render = |page| Job::with_mode(render(page), JobMode::NonBlocking);
    let a = scheduler.add(async_render(0), JobPriority::Low);
    let b = scheduler.add(async_render(1), JobPriority::Low);
    let c = scheduler.add(async_render(2), JobPriority::Low);

    // c jumps ahead of b while a is in flight
    assert!(scheduler.update_priority(&c, JobPriority::High));
    assert_eq!(events.borrow().len(), 1);

    loop {
        // Completing starts the next job, which pushes onto `events` again
        let next = events.borrow_mut().pop_front();
        let Some(completion) = next else { break };
        log.borrow_mut().push(format!("finish {}", completion.job().id()));
        completion.complete();
    }

    assert_eq!(
        *log.borrow(),
        vec![
            format!("start {}", a.id()),
            format!("finish {}", a.id()),
            format!("start {}", c.id()),
            format!("finish {}", c.id()),
            format!("start {}", b.id()),
            format!("finish {}", b.id()),
        ]
    );
    assert!([&a, &b, &c].iter().all(|handle| handle.is_finished()));
    assert!(!scheduler.async_dispatcher().unwrap().is_busy());
}

//! Embedded static HTML served by the dashboard route.
//!
//! Kept as `&'static str` so the page ships inside the binary without
//! filesystem lookups.

pub const DASHBOARD_HTML: &str = r##"<!doctype html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>robowatch</title>
  <style>
    body { margin: 0; font-family: system-ui, sans-serif; background: #0b1220; color: #e2e8f0; }
    header { display: flex; gap: 1rem; align-items: center; padding: .75rem 1rem; background: #111a2e; }
    header .state { padding: .15rem .6rem; border-radius: .4rem; background: #334155; }
    header .state.live { background: #15803d; }
    header .state.frozen { background: #a16207; }
    header .state.offline { background: #b91c1c; }
    main { display: grid; grid-template-columns: 2fr 1fr; gap: 1rem; padding: 1rem; }
    img { width: 100%; border-radius: .5rem; background: #000; }
    section { background: #111a2e; border-radius: .5rem; padding: .75rem; margin-bottom: 1rem; }
    table { width: 100%; border-collapse: collapse; font-size: .9rem; }
    td { padding: .15rem .3rem; border-bottom: 1px solid #1e293b; }
    td:last-child { text-align: right; font-variant-numeric: tabular-nums; }
    canvas { width: 100%; height: 220px; background: #0f172a; border-radius: .4rem; }
    button { background: #1d4ed8; color: #fff; border: 0; border-radius: .3rem; padding: .35rem .8rem; cursor: pointer; }
  </style>
</head>
<body>
  <header>
    <strong>robowatch</strong>
    <span id="state" class="state">connecting</span>
    <span>last frame: <span id="last-frame">-</span></span>
    <span style="flex:1"></span>
    <button onclick="control('/start-recording')">Record</button>
    <button onclick="control('/stop-recording')">Stop</button>
    <button onclick="visionMode('fullscreen')">Fullscreen</button>
    <button onclick="visionMode('glasses')">Glasses</button>
    <button onclick="visionMode('grid')">Grid</button>
    <span id="recording"></span>
  </header>
  <main>
    <div>
      <img src="/video_feed" alt="fused preview" />
      <section>
        <h3>Map</h3>
        <canvas id="map" width="600" height="220"></canvas>
      </section>
    </div>
    <div>
      <section><h3>Metrics</h3><table id="metrics"></table></section>
      <section><h3>Sensors <small id="sensor-time"></small></h3><table id="sensors"></table></section>
    </div>
  </main>
  <script>
    const dots = [];
    let robot = null;

    function fillTable(id, rows) {
      document.getElementById(id).innerHTML = rows
        .map(([k, v]) => `<tr><td>${k}</td><td>${v}</td></tr>`)
        .join("");
    }

    function drawMap() {
      const canvas = document.getElementById("map");
      const ctx = canvas.getContext("2d");
      ctx.clearRect(0, 0, canvas.width, canvas.height);
      const points = dots.concat(robot ? [robot] : []);
      if (!points.length) return;
      const xs = points.map(p => p.x), ys = points.map(p => p.y);
      const minX = Math.min(...xs) - 1, maxX = Math.max(...xs) + 1;
      const minY = Math.min(...ys) - 1, maxY = Math.max(...ys) + 1;
      const sx = x => (x - minX) / (maxX - minX) * canvas.width;
      const sy = y => canvas.height - (y - minY) / (maxY - minY) * canvas.height;
      ctx.fillStyle = "#38bdf8";
      for (const d of dots) { ctx.beginPath(); ctx.arc(sx(d.x), sy(d.y), 3, 0, 7); ctx.fill(); }
      if (robot) { ctx.fillStyle = "#facc15"; ctx.fillRect(sx(robot.x) - 4, sy(robot.y) - 4, 8, 8); }
    }

    async function refreshStatus() {
      try {
        const status = await (await fetch("/status")).json();
        const el = document.getElementById("state");
        el.textContent = status.stream_status;
        el.className = "state " + status.stream_status.toLowerCase();
        document.getElementById("last-frame").textContent = status.last_frame_time || "-";
        document.getElementById("recording").textContent = status.recording ? "REC" : "";
      } catch (_) {}
    }

    async function control(path) {
      await fetch(path, { method: "POST" });
      refreshStatus();
    }

    async function visionMode(mode) {
      await fetch("/set-vision-mode", {
        method: "POST",
        headers: { "Content-Type": "application/json" },
        body: JSON.stringify({ mode }),
      });
      refreshStatus();
    }

    const events = new EventSource("/stream-updates");
    events.addEventListener("metrics_update", e => {
      fillTable("metrics", Object.entries(JSON.parse(e.data)));
    });
    events.addEventListener("sensor_update", e => {
      const data = JSON.parse(e.data);
      document.getElementById("sensor-time").textContent = data.timestamp;
      fillTable("sensors", data.values.map((v, i) => [`ch ${i}`, v.toFixed(2)]));
    });
    events.addEventListener("robot_position_update", e => { robot = JSON.parse(e.data); drawMap(); });
    events.addEventListener("map_dot_update", e => { dots.push(JSON.parse(e.data)); drawMap(); });
    events.addEventListener("clear_map_dots", () => { dots.length = 0; drawMap(); });

    fetch("/metrics").then(r => r.json()).then(m => fillTable("metrics", Object.entries(m)));
    refreshStatus();
    setInterval(refreshStatus, 1000);
  </script>
</body>
</html>
"##;
